//! Request descriptor builder

use std::{collections::BTreeMap, fmt};

use reqwest::Method;
use serde::Serialize;

use crate::{
    config::FetchConfig,
    error::{HttpError, Result},
    multipart::{FormValue, MultipartBody, MultipartFactory, PartOptions},
    types::{format_number, FetchRequest, RequestBody},
};

/// Value for a path, query or header parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Absent; skipped by `query` and `header`, empty in a path
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// String form used in paths and headers; lists are comma-joined
    pub fn to_param_string(&self) -> String {
        match self {
            ParamValue::Null => String::new(),
            ParamValue::Str(value) => value.clone(),
            ParamValue::Int(value) => value.to_string(),
            ParamValue::Float(value) => format_number(*value),
            ParamValue::Bool(value) => value.to_string(),
            ParamValue::List(items) => items
                .iter()
                .map(ParamValue::to_param_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// One string per present item; lists expand, nulls drop out
    fn flatten(&self) -> Vec<String> {
        match self {
            ParamValue::Null => Vec::new(),
            ParamValue::List(items) => items.iter().flat_map(ParamValue::flatten).collect(),
            other => vec![other.to_param_string()],
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::Str(value.clone())
    }
}

macro_rules! int_param {
    ($($ty:ty),*) => {
        $(impl From<$ty> for ParamValue {
            fn from(value: $ty) -> Self {
                ParamValue::Int(value as i64)
            }
        })*
    };
}

int_param!(i8, i16, i32, i64, u8, u16, u32, usize);

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(items: Vec<T>) -> Self {
        ParamValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ParamValue> + Clone> From<&[T]> for ParamValue {
    fn from(items: &[T]) -> Self {
        ParamValue::List(items.iter().cloned().map(Into::into).collect())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ParamValue::Null, Into::into)
    }
}

enum PendingBody {
    Ready(RequestBody),
    Multipart(Box<dyn MultipartBody>),
}

/// Accumulates one request descriptor
///
/// Each setter consumes and returns the builder so calls chain; the ones
/// that can fail return `Result<Self>`.
pub struct ParameterBuilder {
    method: Method,
    url: String,
    query: BTreeMap<String, ParamValue>,
    headers: BTreeMap<String, String>,
    body: Option<PendingBody>,
    form_data: Option<MultipartFactory>,
}

/// Start a request for `path` (which may contain `{placeholders}`) under `base_url`
pub fn parameter_builder(
    method: Method,
    base_url: &str,
    path: &str,
    config: &FetchConfig,
) -> ParameterBuilder {
    ParameterBuilder::new(method, base_url, path, config.form_data.clone())
}

impl ParameterBuilder {
    pub fn new(
        method: Method,
        base_url: &str,
        path: &str,
        form_data: Option<MultipartFactory>,
    ) -> Self {
        Self {
            method,
            url: format!("{base_url}{path}"),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            form_data,
        }
    }

    /// Replace the first `{name}` in the URL with the percent-encoded value
    pub fn path(mut self, name: &str, value: impl Into<ParamValue>) -> Result<Self> {
        let placeholder = format!("{{{name}}}");
        if !self.url.contains(&placeholder) {
            return Err(HttpError::NotAPathParameter(name.to_string()));
        }
        let encoded = urlencoding::encode(&value.into().to_param_string()).into_owned();
        self.url = self.url.replacen(&placeholder, &encoded, 1);
        Ok(self)
    }

    /// Set a query parameter; a later value for the same name replaces the earlier one
    pub fn query(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.query.insert(name.to_string(), value);
        }
        self
    }

    /// Send `json` as the body. The first argument only mirrors the other body setters.
    pub fn body<T: Serialize + ?Sized>(mut self, _name: &str, json: &T) -> Result<Self> {
        let text = serde_json::to_string(json)?;
        self.headers
            .entry("content-type".to_string())
            .or_insert_with(|| "application/json".to_string());
        self.body = Some(PendingBody::Ready(RequestBody::Text(text)));
        Ok(self)
    }

    /// Send `data` as an `application/x-www-form-urlencoded` body
    pub fn form_url_encoded<K, V, I>(mut self, data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<ParamValue>,
    {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in data {
            for item in value.into().flatten() {
                serializer.append_pair(key.as_ref(), &item);
            }
        }
        self.headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        self.body = Some(PendingBody::Ready(RequestBody::Text(serializer.finish())));
        self
    }

    /// Append a multipart field; lists append one part per item
    pub fn form_data(
        mut self,
        name: &str,
        value: impl Into<FormValue>,
        options: Option<PartOptions>,
    ) -> Result<Self> {
        if !matches!(self.body, Some(PendingBody::Multipart(_))) {
            let factory = self
                .form_data
                .as_ref()
                .ok_or(HttpError::FormDataUnavailable)?;
            self.body = Some(PendingBody::Multipart(factory()));
        }
        let Some(PendingBody::Multipart(form)) = self.body.as_mut() else {
            return Err(HttpError::FormDataUnavailable);
        };

        let items = match value.into() {
            FormValue::List(items) => items,
            single => vec![single],
        };
        for (index, item) in items.into_iter().enumerate() {
            let metadata = options.as_ref().and_then(|options| options.for_item(index));
            if let Some(part) = item.into_part(metadata) {
                form.append(name, part, metadata);
            }
        }
        Ok(self)
    }

    /// Append every field of an object-shaped form, looking up options by field name
    pub fn form_data_fields<K, I>(
        self,
        fields: I,
        options: Option<&BTreeMap<String, PartOptions>>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (K, FormValue)>,
        K: AsRef<str>,
    {
        fields.into_iter().try_fold(self, |builder, (name, value)| {
            let field_options = options.and_then(|options| options.get(name.as_ref())).cloned();
            builder.form_data(name.as_ref(), value, field_options)
        })
    }

    /// Set a header (name lower-cased) unless the value is absent
    pub fn header(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.headers.insert(name.to_lowercase(), value.to_param_string());
        }
        self
    }

    pub fn build(self) -> Result<FetchRequest> {
        if let Some(name) = unresolved_placeholder(&self.url) {
            return Err(HttpError::MissingPathParameter(name.to_string()));
        }

        let mut request = FetchRequest::new(self.method, self.url);
        request.headers = self.headers;
        request.body = match self.body {
            None => None,
            Some(PendingBody::Ready(body)) => Some(body),
            Some(PendingBody::Multipart(form)) => {
                for (name, value) in form.headers().unwrap_or_default() {
                    request.set_header(&name, value);
                }
                Some(form.finish())
            }
        };

        if !self.query.is_empty() {
            let query = self
                .query
                .iter()
                .flat_map(|(key, value)| {
                    let key = urlencoding::encode(key);
                    value
                        .flatten()
                        .into_iter()
                        .map(move |item| format!("{key}={}", urlencoding::encode(&item)))
                })
                .collect::<Vec<_>>()
                .join("&");
            let separator = if request.url.contains('?') { '&' } else { '?' };
            request.url = format!("{}{separator}{query}", request.url);
        }

        Ok(request)
    }
}

impl fmt::Debug for ParameterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field(
                "body",
                &self.body.as_ref().map(|body| match body {
                    PendingBody::Ready(body) => format!("{body:?}"),
                    PendingBody::Multipart(_) => "multipart".to_string(),
                }),
            )
            .finish()
    }
}

fn unresolved_placeholder(url: &str) -> Option<&str> {
    let start = url.find('{')?;
    let end = url[start..].find('}')? + start;
    Some(&url[start + 1..end])
}
