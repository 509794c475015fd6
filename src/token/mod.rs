//! Random tokens and message authentication codes

use crate::crypto::KeyManager;
use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;

/// Default token size in bytes (43 base64url characters)
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Generate `byte_len` random bytes, encoded as unpadded base64url
pub fn generate_secure_token(byte_len: usize) -> Result<String> {
    if byte_len == 0 {
        return Err(Error::TokenGeneration(
            "Token length must be greater than 0".to_string(),
        ));
    }

    let mut bytes = vec![0u8; byte_len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| Error::TokenGeneration("System random source failed".to_string()))?;

    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}

/// HMAC-SHA256 over arbitrary data
///
/// With no explicit key, the current master key is used. MACs made before a
/// rotation therefore stop verifying once the rotation lands; pass an explicit
/// key for MACs that must outlive rotations.
pub struct MacService {
    keys: Arc<KeyManager>,
}

impl MacService {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        MacService { keys }
    }

    /// Hex-encoded HMAC-SHA256 of `data`
    pub fn create_mac(&self, data: &[u8], key: Option<&[u8]>) -> String {
        let tag = hmac::sign(&self.hmac_key(key), data);
        hex::encode(tag.as_ref())
    }

    /// Constant-time check of a hex MAC. Undecodable input is `false`.
    pub fn verify_mac(&self, data: &[u8], mac: &str, key: Option<&[u8]>) -> bool {
        let Ok(tag) = hex::decode(mac.trim()) else {
            return false;
        };
        hmac::verify(&self.hmac_key(key), data, &tag).is_ok()
    }

    fn hmac_key(&self, key: Option<&[u8]>) -> hmac::Key {
        match key {
            Some(key) => hmac::Key::new(hmac::HMAC_SHA256, key),
            None => hmac::Key::new(hmac::HMAC_SHA256, self.keys.current_key().secret()),
        }
    }
}
