//! Request and response shapes shared by the builder, the fetch pipeline and
//! the transports.

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use reqwest::{header::HeaderMap, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{abort::AbortSignal, error::HttpError, multipart::FormEntry};

/// Body attached to an outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    /// Form parts, encoded as `multipart/form-data` by the transport on each attempt
    Multipart(Vec<FormEntry>),
}

impl RequestBody {
    /// Raw payload, when the body is already encoded
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RequestBody::Text(text) => Some(text.as_bytes()),
            RequestBody::Bytes(bytes) => Some(bytes),
            RequestBody::Multipart(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn parts(&self) -> Option<&[FormEntry]> {
        match self {
            RequestBody::Multipart(entries) => Some(entries),
            _ => None,
        }
    }
}

/// Request descriptor handed to a transport
///
/// Header names are stored lower-cased. `signal` is only set on the
/// per-attempt copy that goes on the wire.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub signal: Option<AbortSignal>,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            signal: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Raw response produced by a transport
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Lower-cased `content-type`, if the response declared one
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(str::to_lowercase)
    }
}

/// Decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Blob(Bytes),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Blob(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Blob(bytes) => Some(bytes),
            ResponseBody::Json(_) => None,
        }
    }

    /// Deserialize a JSON body into `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        match self {
            ResponseBody::Json(value) => Ok(T::deserialize(value)?),
            ResponseBody::Blob(bytes) => Ok(serde_json::from_slice(bytes)?),
        }
    }

    /// The `message` field of a JSON error body
    pub fn message(&self) -> Option<&str> {
        self.as_json()
            .and_then(|value| value.get("message"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Response,
    Error,
}

/// Result of a logical call that resolved
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub request: FetchRequest,
    pub status: u16,
    pub status_code: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub response_type: ResponseType,
    /// The error an allow-listed status produced
    pub err_obj: Option<Arc<HttpError>>,
    /// The decoded response an allow-listed error was built from
    pub response: Option<Box<FetchResponse>>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Identifies which generated client method issued a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSource {
    pub method: String,
    pub client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl CallSource {
    pub fn new(client: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            client: client.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

pub(crate) fn is_success_status(status: u16) -> bool {
    (200..=299).contains(&status)
}

/// Integral floats print without a fractional part (`3.0` -> `"3"`)
pub(crate) fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_are_lower_cased() {
        let request = FetchRequest::get("http://example.com").with_header("X-Trace", "abc");
        assert_eq!(request.header("x-trace"), Some("abc"));
        assert_eq!(request.header("X-TRACE"), Some("abc"));
        assert!(request.headers.contains_key("x-trace"));
    }

    #[test]
    fn test_error_body_message() {
        let body = ResponseBody::Json(json!({"code": "nope", "message": "Not allowed"}));
        assert_eq!(body.message(), Some("Not allowed"));
        assert_eq!(ResponseBody::Blob(Bytes::from_static(b"x")).message(), None);
    }

    #[test]
    fn test_json_body_deserializes() {
        #[derive(Deserialize)]
        struct Pet {
            id: u32,
        }
        let body = ResponseBody::Json(json!({"id": 7}));
        assert_eq!(body.json::<Pet>().unwrap().id, 7);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn test_call_source_serializes_without_arguments() {
        let source = CallSource::new("PetClient", "getPet");
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(value, json!({"method": "getPet", "client": "PetClient"}));
    }
}
