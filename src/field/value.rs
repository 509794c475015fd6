//! Typed field values

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// How the plaintext inside an envelope is to be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// UTF-8 text, returned as-is
    String,
    /// JSON document
    Json,
}

impl ValueKind {
    /// Identifier written into envelopes
    pub fn id(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Json => "json",
        }
    }
}

/// A value that can be stored in an encrypted field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Json(serde_json::Value),
}

impl FieldValue {
    /// The kind tag written into the envelope
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::String(_) => ValueKind::String,
            FieldValue::Json(_) => ValueKind::Json,
        }
    }

    pub(crate) fn to_plaintext(&self) -> Result<(ValueKind, Vec<u8>)> {
        match self {
            FieldValue::String(s) => Ok((ValueKind::String, s.as_bytes().to_vec())),
            FieldValue::Json(v) => Ok((ValueKind::Json, serde_json::to_vec(v)?)),
        }
    }

    pub(crate) fn from_plaintext(kind: ValueKind, plaintext: Vec<u8>) -> Result<Self> {
        match kind {
            ValueKind::String => String::from_utf8(plaintext)
                .map(FieldValue::String)
                .map_err(|_| Error::malformed("String field is not valid UTF-8")),
            ValueKind::Json => serde_json::from_slice(&plaintext)
                .map(FieldValue::Json)
                .map_err(|e| Error::malformed(format!("JSON field does not parse: {}", e))),
        }
    }

    /// The string, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            FieldValue::Json(_) => None,
        }
    }

    /// Convert to a JSON value (strings become JSON strings)
    pub fn into_json(self) -> serde_json::Value {
        match self {
            FieldValue::String(s) => serde_json::Value::String(s),
            FieldValue::Json(v) => v,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => FieldValue::String(s),
            other => FieldValue::Json(other),
        }
    }
}
