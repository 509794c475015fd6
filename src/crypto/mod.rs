//! Cryptography module for fieldguard
//!
//! Provides AES-256-GCM / ChaCha20-Poly1305 encryption with a PBKDF2 key
//! derived per call from a versioned master key, plus X25519 sealed boxes
//! for small asymmetric payloads.

pub mod asymmetric;
mod encryption;
mod kdf;
mod keys;

pub use asymmetric::{decrypt_with_private_key, encrypt_with_public_key, generate_key_pair, KeyPair};
pub use encryption::{Algorithm, Cipher, EncryptedData};
pub(crate) use encryption::base64_bytes;
pub use kdf::derive_field_key;
pub use keys::{KeyManager, KeyMaterial};

/// Size of AES-256 / ChaCha20 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of AEAD nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of AEAD authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Size of salt for key derivation
pub const SALT_SIZE: usize = 32;
