//! fieldguard - Field-level data protection
//!
//! This library encrypts individual data fields into self-describing
//! envelopes under a versioned master key, hashes passwords, issues random
//! tokens and MACs, and provides axum middleware that encrypts payloads at
//! the HTTP boundary.

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod field;
pub mod middleware;
pub mod pool;
pub mod protection;
pub mod token;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{DecryptionError, Error, Result};
pub use protection::DataProtection;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::credentials::{verify_password, PasswordHasher, PasswordRecord};
    pub use crate::crypto::{Cipher, KeyManager};
    pub use crate::error::{DecryptionError, Error, Result};
    pub use crate::field::{FieldCodec, FieldValue};
    pub use crate::middleware::{router_with_boundary, BoundaryState, SkipEncryption};
    pub use crate::protection::DataProtection;
    pub use crate::token::{generate_secure_token, MacService};
}
