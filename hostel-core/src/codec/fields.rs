use std::collections::HashMap;
use std::str::FromStr;

use bytes::Bytes;

use crate::http::media::MediaType;

// ── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while pulling typed values out of a decoded field map.
#[derive(Debug)]
pub enum FieldsError {
    /// A required field was not present.
    MissingField(String),
    /// A text field could not be parsed to the expected type.
    ParseError { field: String, message: String },
}

impl std::fmt::Display for FieldsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(name) => write!(f, "missing required field: {name}"),
            Self::ParseError { field, message } => {
                write!(f, "failed to parse field '{field}': {message}")
            }
        }
    }
}

impl std::error::Error for FieldsError {}

impl From<FieldsError> for crate::error::HttpError {
    fn from(err: FieldsError) -> Self {
        crate::error::HttpError::BadRequest(err.to_string())
    }
}

// ── FileStream ──────────────────────────────────────────────────────────────

/// A file received through a `multipart/form-data` section.
#[derive(Debug, Clone)]
pub struct FileStream {
    /// The field name in the form.
    pub name: String,
    /// The original file name provided by the client, if any.
    pub filename: Option<String>,
    /// The content type of the section, if provided.
    pub media: Option<MediaType>,
    /// The raw file data.
    pub data: Bytes,
}

impl FileStream {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ── Fields ──────────────────────────────────────────────────────────────────

/// A flat field multimap decoded from a form-shaped body (URL-encoded form,
/// multipart, or XML elements).
///
/// [`FromFields`] implementations consume this to build typed values.
#[derive(Debug, Default)]
pub struct Fields {
    /// Text fields, keyed by field name. Multiple values per key are kept.
    pub text: HashMap<String, Vec<String>>,
    /// File fields, keyed by field name. Multiple files per key are kept.
    pub files: HashMap<String, Vec<FileStream>>,
}

impl Fields {
    pub fn new() -> Fields {
        Fields::default()
    }

    pub fn push_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.text.entry(name.into()).or_default().push(value.into());
    }

    pub fn push_file(&mut self, file: FileStream) {
        self.files.entry(file.name.clone()).or_default().push(file);
    }

    /// Take a single required text value for the given field name.
    pub fn take_text(&mut self, name: &str) -> Result<String, FieldsError> {
        self.take_text_opt(name)
            .ok_or_else(|| FieldsError::MissingField(name.to_string()))
    }

    /// Take an optional text value for the given field name.
    pub fn take_text_opt(&mut self, name: &str) -> Option<String> {
        self.text
            .get_mut(name)
            .and_then(|v| if v.is_empty() { None } else { Some(v.remove(0)) })
    }

    /// Take all text values for the given field name.
    pub fn take_all_text(&mut self, name: &str) -> Vec<String> {
        self.text.remove(name).unwrap_or_default()
    }

    /// Take a required text value and parse it.
    pub fn take_parsed<T: FromStr>(&mut self, name: &str) -> Result<T, FieldsError>
    where
        T::Err: std::fmt::Display,
    {
        let raw = self.take_text(name)?;
        raw.parse().map_err(|e: T::Err| FieldsError::ParseError {
            field: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Take an optional text value and parse it when present.
    pub fn take_parsed_opt<T: FromStr>(&mut self, name: &str) -> Result<Option<T>, FieldsError>
    where
        T::Err: std::fmt::Display,
    {
        match self.take_text_opt(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: T::Err| FieldsError::ParseError {
                    field: name.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Take a single required file for the given field name.
    pub fn take_file(&mut self, name: &str) -> Result<FileStream, FieldsError> {
        self.take_file_opt(name)
            .ok_or_else(|| FieldsError::MissingField(name.to_string()))
    }

    /// Take an optional file for the given field name.
    pub fn take_file_opt(&mut self, name: &str) -> Option<FileStream> {
        self.files
            .get_mut(name)
            .and_then(|v| if v.is_empty() { None } else { Some(v.remove(0)) })
    }

    /// Take all files for the given field name.
    pub fn take_files(&mut self, name: &str) -> Vec<FileStream> {
        self.files.remove(name).unwrap_or_default()
    }

    /// The first file in the map, regardless of field name. Convenient for
    /// targets with a single stream-typed field.
    pub fn take_any_file(&mut self) -> Option<FileStream> {
        let name = self.files.keys().next().cloned()?;
        self.take_file_opt(&name)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.files.is_empty()
    }
}

/// Types constructible from a decoded [`Fields`] map — the reflective
/// field-name match of the form, multipart, and XML codecs.
pub trait FromFields: Sized {
    fn from_fields(fields: &mut Fields) -> Result<Self, FieldsError>;
}
