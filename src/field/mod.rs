//! Field codec
//!
//! Turns a string or JSON value into a self-describing envelope string and
//! back. The envelope carries everything the cipher needs except the master
//! key and the context, so no schema lookup is needed to decrypt.
//!
//! The format and value kind are authenticated alongside the ciphertext, so
//! relabeling either one fails with `AuthTagMismatch`.
//!
//! Malformed input (not JSON, missing fields, bad base64, unknown kind or
//! format) is reported as `MalformedEnvelope`, separately from tag failures.

mod value;

pub use value::{FieldValue, ValueKind};

use crate::crypto::{Cipher, EncryptedData};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Envelope layout version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvelopeFormat {
    #[default]
    #[serde(rename = "v1")]
    V1,
}

impl EnvelopeFormat {
    /// Identifier written into envelopes
    pub fn id(&self) -> &'static str {
        match self {
            EnvelopeFormat::V1 => "v1",
        }
    }
}

/// Serialized form of one encrypted field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(flatten)]
    pub data: EncryptedData,
    pub value_kind: ValueKind,
    #[serde(default)]
    pub format: EnvelopeFormat,
}

impl Envelope {
    /// Parse a serialized envelope without decrypting it
    pub fn parse(serialized: &str) -> Result<Self> {
        serde_json::from_str(serialized).map_err(|e| Error::malformed(e.to_string()))
    }

    /// Envelope metadata bound into the associated data
    fn binding(&self) -> Vec<u8> {
        metadata_binding(self.format, self.value_kind)
    }

    /// Serialize to the wire string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn metadata_binding(format: EnvelopeFormat, kind: ValueKind) -> Vec<u8> {
    // Neither id contains a NUL byte
    [format.id().as_bytes(), &[0u8][..], kind.id().as_bytes()].concat()
}

/// Encrypts and decrypts typed field values
pub struct FieldCodec {
    cipher: Arc<Cipher>,
}

impl FieldCodec {
    /// Create a codec over `cipher`
    pub fn new(cipher: Arc<Cipher>) -> Self {
        FieldCodec { cipher }
    }

    /// The underlying cipher
    pub fn cipher(&self) -> &Arc<Cipher> {
        &self.cipher
    }

    /// Encrypt a value into an envelope
    pub fn seal(&self, value: &FieldValue, context: Option<&str>) -> Result<Envelope> {
        let (kind, plaintext) = value.to_plaintext()?;
        let format = EnvelopeFormat::V1;
        let data = self
            .cipher
            .encrypt_bound(&plaintext, context, &metadata_binding(format, kind))?;

        Ok(Envelope {
            data,
            value_kind: kind,
            format,
        })
    }

    /// Decrypt an envelope into the value it was sealed from
    pub fn open(&self, envelope: &Envelope, context: Option<&str>) -> Result<FieldValue> {
        let plaintext = self
            .cipher
            .decrypt_bound(&envelope.data, context, &envelope.binding())?;
        FieldValue::from_plaintext(envelope.value_kind, plaintext)
    }

    /// Encrypt a value into a serialized envelope string
    pub fn encrypt_field(&self, value: &FieldValue, context: Option<&str>) -> Result<String> {
        self.seal(value, context)?.to_json()
    }

    /// Decrypt a serialized envelope string
    pub fn decrypt_field(&self, serialized: &str, context: Option<&str>) -> Result<FieldValue> {
        let envelope = Envelope::parse(serialized)?;
        self.open(&envelope, context).inspect_err(|e| {
            warn!(
                "Rejected envelope (key version {}): {}",
                envelope.data.key_version, e
            )
        })
    }

    /// Encrypt any serializable value
    pub fn encrypt_json<T: Serialize>(&self, value: &T, context: Option<&str>) -> Result<String> {
        let value = serde_json::to_value(value)?;
        self.encrypt_field(&FieldValue::from(value), context)
    }

    /// Decrypt into any deserializable type
    pub fn decrypt_json<T: DeserializeOwned>(
        &self,
        serialized: &str,
        context: Option<&str>,
    ) -> Result<T> {
        let value = self.decrypt_field(serialized, context)?.into_json();
        Ok(serde_json::from_value(value)?)
    }
}
