//! Error types for fieldguard

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fieldguard
#[derive(Error, Debug)]
pub enum Error {
    // Startup errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Crypto errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(#[from] DecryptionError),

    #[error("Hashing error: {0}")]
    Hashing(String),

    #[error("Token generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Why an envelope could not be opened
///
/// None of these are retryable. Callers treat all of them as
/// "data unavailable or tampered".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("authentication tag mismatch")]
    AuthTagMismatch,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown key version: {0}")]
    UnknownKeyVersion(u32),
}

impl Error {
    /// The decryption sub-kind, if this is a decryption failure
    pub fn decryption_kind(&self) -> Option<&DecryptionError> {
        match self {
            Error::Decryption(kind) => Some(kind),
            _ => None,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::Decryption(DecryptionError::MalformedEnvelope(reason.into()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
