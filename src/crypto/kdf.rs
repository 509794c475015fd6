//! Per-call key derivation
//!
//! The field key is never the raw master key: it is PBKDF2-HMAC-SHA256 over
//! the master secret with `salt || context` as the salt input.

use crate::crypto::KEY_SIZE;
use ring::pbkdf2;
use std::num::NonZeroU32;
use zeroize::Zeroizing;

/// Derive a field key from master secret, salt and optional context
///
/// `None` and an empty context derive the same key.
pub fn derive_field_key(
    master: &[u8],
    salt: &[u8],
    context: Option<&str>,
    iterations: NonZeroU32,
) -> Zeroizing<[u8; KEY_SIZE]> {
    let context = context.unwrap_or("");

    let mut salt_input = Vec::with_capacity(salt.len() + context.len());
    salt_input.extend_from_slice(salt);
    salt_input.extend_from_slice(context.as_bytes());

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        &salt_input,
        master,
        &mut key[..],
    );
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iterations() -> NonZeroU32 {
        NonZeroU32::new(10).unwrap()
    }

    #[test]
    fn test_deterministic() {
        let a = derive_field_key(b"master", b"salt", Some("users.email"), iterations());
        let b = derive_field_key(b"master", b"salt", Some("users.email"), iterations());
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_context_separates_keys() {
        let a = derive_field_key(b"master", b"salt", Some("users.email"), iterations());
        let b = derive_field_key(b"master", b"salt", Some("users.phone"), iterations());
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_empty_context_equals_none() {
        let a = derive_field_key(b"master", b"salt", None, iterations());
        let b = derive_field_key(b"master", b"salt", Some(""), iterations());
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_salt_changes_key() {
        let a = derive_field_key(b"master", b"salt-1", None, iterations());
        let b = derive_field_key(b"master", b"salt-2", None, iterations());
        assert_ne!(*a, *b);
    }
}
