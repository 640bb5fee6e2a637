//! Multipart form bodies

use std::sync::Arc;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};

use crate::{
    error::{HttpError, Result},
    types::{format_number, RequestBody},
};

/// File name and content type attached to a form part
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartMetadata {
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl PartMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn has_any(&self) -> bool {
        self.filename.is_some() || self.content_type.is_some()
    }
}

/// Metadata for a field, either shared by every item or given per item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartOptions {
    Single(PartMetadata),
    PerItem(Vec<Option<PartMetadata>>),
}

impl PartOptions {
    /// Metadata for the item at `index`; per-item lists are matched by position
    pub fn for_item(&self, index: usize) -> Option<&PartMetadata> {
        match self {
            PartOptions::Single(metadata) => Some(metadata),
            PartOptions::PerItem(items) => items.get(index).and_then(Option::as_ref),
        }
    }
}

impl From<PartMetadata> for PartOptions {
    fn from(metadata: PartMetadata) -> Self {
        PartOptions::Single(metadata)
    }
}

/// Binary payload tagged with a content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl Blob {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type,
        }
    }
}

/// Value accepted by `form_data`
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Null,
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    Bytes(Bytes),
    Blob(Blob),
    /// One part per item
    List(Vec<FormValue>),
}

impl FormValue {
    /// Convert a single (non-list) value into the part that gets appended
    ///
    /// Null yields nothing. With metadata present, text and raw bytes are
    /// wrapped into a blob tagged with the declared content type.
    pub fn into_part(self, metadata: Option<&PartMetadata>) -> Option<FormPart> {
        let tagged = metadata.filter(|metadata| metadata.has_any());
        let wrap = |bytes: Bytes| {
            FormPart::Blob(Blob::new(
                bytes,
                tagged.and_then(|metadata| metadata.content_type.clone()),
            ))
        };
        let text = match self {
            FormValue::Null => return None,
            FormValue::Blob(blob) => return Some(FormPart::Blob(blob)),
            FormValue::Bytes(bytes) if tagged.is_some() => return Some(wrap(bytes)),
            FormValue::Bytes(bytes) => return Some(FormPart::Bytes(bytes)),
            FormValue::List(items) => {
                let values: Vec<serde_json::Value> =
                    items.into_iter().map(FormValue::into_json).collect();
                serde_json::Value::Array(values).to_string()
            }
            FormValue::Text(text) => text,
            FormValue::Integer(value) => value.to_string(),
            FormValue::Number(value) => format_number(value),
            FormValue::Bool(value) => value.to_string(),
        };
        if tagged.is_some() {
            Some(wrap(Bytes::from(text)))
        } else {
            Some(FormPart::Text(text))
        }
    }

    fn into_json(self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FormValue::Null => Value::Null,
            FormValue::Text(text) => Value::String(text),
            FormValue::Integer(value) => Value::from(value),
            FormValue::Number(value) => Value::from(value),
            FormValue::Bool(value) => Value::Bool(value),
            FormValue::Bytes(bytes) | FormValue::Blob(Blob { bytes, .. }) => {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            }
            FormValue::List(items) => {
                Value::Array(items.into_iter().map(FormValue::into_json).collect())
            }
        }
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

impl From<i64> for FormValue {
    fn from(value: i64) -> Self {
        FormValue::Integer(value)
    }
}

impl From<i32> for FormValue {
    fn from(value: i32) -> Self {
        FormValue::Integer(value.into())
    }
}

impl From<u32> for FormValue {
    fn from(value: u32) -> Self {
        FormValue::Integer(value.into())
    }
}

impl From<f64> for FormValue {
    fn from(value: f64) -> Self {
        FormValue::Number(value)
    }
}

impl From<bool> for FormValue {
    fn from(value: bool) -> Self {
        FormValue::Bool(value)
    }
}

impl From<Bytes> for FormValue {
    fn from(value: Bytes) -> Self {
        FormValue::Bytes(value)
    }
}

impl From<Vec<u8>> for FormValue {
    fn from(value: Vec<u8>) -> Self {
        FormValue::Bytes(Bytes::from(value))
    }
}

impl From<Blob> for FormValue {
    fn from(value: Blob) -> Self {
        FormValue::Blob(value)
    }
}

impl From<Vec<FormValue>> for FormValue {
    fn from(items: Vec<FormValue>) -> Self {
        FormValue::List(items)
    }
}

impl From<Vec<String>> for FormValue {
    fn from(items: Vec<String>) -> Self {
        FormValue::List(items.into_iter().map(FormValue::Text).collect())
    }
}

impl From<Vec<Bytes>> for FormValue {
    fn from(items: Vec<Bytes>) -> Self {
        FormValue::List(items.into_iter().map(FormValue::Bytes).collect())
    }
}

impl<T: Into<FormValue>> From<Option<T>> for FormValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FormValue::Null, Into::into)
    }
}

/// A single entry appended to a multipart body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    Text(String),
    Bytes(Bytes),
    Blob(Blob),
}

/// Multipart body under construction
pub trait MultipartBody: Send {
    fn append(&mut self, name: &str, part: FormPart, metadata: Option<&PartMetadata>);

    /// Headers the body needs on the request
    fn headers(&self) -> Option<Vec<(String, String)>> {
        None
    }

    /// Turn the appended parts into the request body
    fn finish(self: Box<Self>) -> RequestBody;
}

/// Produces an empty multipart body per request
pub type MultipartFactory = Arc<dyn Fn() -> Box<dyn MultipartBody> + Send + Sync>;

/// Constructor for the built-in [`MultipartForm`]
pub fn default_form_data() -> MultipartFactory {
    Arc::new(|| Box::new(MultipartForm::new()) as Box<dyn MultipartBody>)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormEntry {
    pub name: String,
    pub part: FormPart,
    pub metadata: Option<PartMetadata>,
}

/// Collects parts for a `multipart/form-data` body
///
/// The parts stay as plain data so a request can be cloned for every retry;
/// the transport encodes them, boundary and content type included.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    entries: Vec<FormEntry>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parts(&self) -> &[FormEntry] {
        &self.entries
    }
}

impl MultipartBody for MultipartForm {
    fn append(&mut self, name: &str, part: FormPart, metadata: Option<&PartMetadata>) {
        self.entries.push(FormEntry {
            name: name.to_string(),
            part,
            metadata: metadata.filter(|metadata| metadata.has_any()).cloned(),
        });
    }

    fn finish(self: Box<Self>) -> RequestBody {
        RequestBody::Multipart(self.entries)
    }
}

const OCTET_STREAM: &str = "application/octet-stream";

/// Build the reqwest form for one attempt
///
/// Raw bytes default to `application/octet-stream`. Blobs are always sent
/// as files, named `blob` unless a filename was given.
pub(crate) fn reqwest_form(entries: &[FormEntry]) -> Result<Form> {
    entries.iter().try_fold(Form::new(), |form, entry| -> Result<Form> {
        let filename = entry
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.filename.clone());
        let declared = entry
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.content_type.as_deref());

        let (part, content_type, filename) = match &entry.part {
            FormPart::Text(text) => (Part::text(text.clone()), declared, filename),
            FormPart::Bytes(bytes) => (
                Part::bytes(bytes.to_vec()),
                Some(declared.unwrap_or(OCTET_STREAM)),
                filename,
            ),
            FormPart::Blob(blob) => (
                Part::bytes(blob.bytes.to_vec()),
                Some(
                    declared
                        .or(blob.content_type.as_deref())
                        .unwrap_or(OCTET_STREAM),
                ),
                Some(filename.unwrap_or_else(|| "blob".to_string())),
            ),
        };
        let part = match content_type {
            Some(content_type) => {
                part.mime_str(content_type)
                    .map_err(|e| HttpError::InvalidHeader {
                        name: format!("content-type of part {}", entry.name),
                        message: e.to_string(),
                    })?
            }
            None => part,
        };
        let part = match filename {
            Some(filename) => part.file_name(filename),
            None => part,
        };
        Ok(form.part(entry.name.clone(), part))
    })
}
