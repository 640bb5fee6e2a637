//! Property-based tests for the request descriptor builder
//!
//! Covers placeholder substitution, query-string encoding and
//! form-urlencoded bodies for arbitrary input.

use std::collections::BTreeMap;

use fetchkit_http::{HttpError, Method, ParamValue, ParameterBuilder, RequestBody};
use proptest::prelude::*;

const BASE: &str = "http://restapi.com";

fn builder(path: &str) -> ParameterBuilder {
    ParameterBuilder::new(Method::GET, BASE, path, None)
}

/// Placeholder names that are plain identifiers
fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}"
}

/// Values with reserved and non-ASCII characters mixed in
fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 =#!@&?/%{}+é]{0,16}"
}

fn decode(value: &str) -> String {
    urlencoding::decode(value).unwrap().into_owned()
}

fn parse_query(url: &str) -> Vec<(String, String)> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap();
            (decode(key), decode(value))
        })
        .collect()
}

proptest! {
    /// Filling every placeholder leaves no `{...}` token behind
    #[test]
    fn prop_all_placeholders_resolve(
        names in prop::collection::btree_set(name_strategy(), 1..4),
        values in prop::collection::vec(value_strategy(), 4),
    ) {
        let path: String = names.iter().map(|name| format!("/{{{name}}}")).collect();
        let mut params = builder(&path);
        for (name, value) in names.iter().zip(&values) {
            params = params.path(name, value.as_str()).unwrap();
        }
        let request = params.build().unwrap();

        prop_assert!(
            !request.url.contains(['{', '}']),
            "unresolved placeholder in {}",
            request.url
        );
        let segments: Vec<String> = request.url[BASE.len()..]
            .split('/')
            .skip(1)
            .map(decode)
            .collect();
        let expected: Vec<String> = values.iter().take(names.len()).cloned().collect();
        prop_assert_eq!(segments, expected);
    }

    /// A placeholder left unfilled fails the build instead of leaking into the URL
    #[test]
    fn prop_unfilled_placeholder_fails(name in name_strategy()) {
        let err = builder(&format!("/items/{{{name}}}")).build().unwrap_err();
        prop_assert!(matches!(err, HttpError::MissingPathParameter(ref missing) if *missing == name));
    }

    /// Naming a placeholder the template lacks is rejected
    #[test]
    fn prop_unknown_placeholder_rejected(name in name_strategy(), value in value_strategy()) {
        let err = builder("/items").path(&name, value.as_str()).unwrap_err();
        prop_assert!(matches!(err, HttpError::NotAPathParameter(_)));
    }

    /// Query pairs decode back to what was set, sorted by key, lists as repeated keys
    #[test]
    fn prop_query_round_trips(
        query in prop::collection::btree_map(name_strategy(), prop::collection::vec(value_strategy(), 1..3), 1..5),
    ) {
        let mut params = builder("/search");
        for (key, values) in &query {
            params = params.query(key, values.clone());
        }
        let request = params.build().unwrap();

        let expected: Vec<(String, String)> = query
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |value| (key.clone(), value.clone())))
            .collect();
        prop_assert_eq!(parse_query(&request.url), expected);
    }

    /// Absent values are dropped, empty strings kept, spaces become `+`
    #[test]
    fn prop_form_url_encoded(
        fields in prop::collection::btree_map(name_strategy(), prop::option::of("[a-z ]{0,6}"), 1..6),
    ) {
        let data: BTreeMap<String, ParamValue> = fields
            .iter()
            .map(|(key, value)| (key.clone(), ParamValue::from(value.clone())))
            .collect();
        let request = builder("/form").form_url_encoded(data).build().unwrap();
        let body = request.body.as_ref().and_then(RequestBody::as_text).unwrap_or_default().to_string();

        prop_assert!(!body.contains(' '));
        prop_assert!(!body.contains("%20"));
        let expected: Vec<String> = fields
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|value| format!("{key}={}", value.replace(' ', "+"))))
            .collect();
        prop_assert_eq!(body, expected.join("&"));
        prop_assert_eq!(request.header("content-type"), Some("application/x-www-form-urlencoded"));
    }
}
