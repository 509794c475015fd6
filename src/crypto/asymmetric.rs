//! Public-key encryption for small payloads
//!
//! Uses X25519 key exchange + XSalsa20-Poly1305. Each seal generates an
//! ephemeral keypair, so the sender stays anonymous and only the recipient's
//! secret key can open the box. Meant for wrapping symmetric keys and
//! bootstrap secrets, not bulk data.
//!
//! Wire format: `ephemeral_pk (32) || nonce (24) || ciphertext + tag`.

use crate::error::{DecryptionError, Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use tracing::debug;

/// Size of an X25519 key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of the XSalsa20 nonce in bytes
pub const BOX_NONCE_SIZE: usize = 24;

/// Largest plaintext accepted for sealing
pub const MAX_SEALED_PLAINTEXT: usize = 4096;

const BOX_TAG_SIZE: usize = 16;

/// X25519 keypair
///
/// The secret key is zeroized on drop by crypto_box. Storing it is the
/// caller's job.
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Returns the public key as raw 32-byte array.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Returns the secret key as raw 32-byte array.
    pub fn secret_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Public key, base64
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Secret key, base64
    pub fn private_key_base64(&self) -> String {
        STANDARD.encode(self.secret.to_bytes())
    }

    /// Reconstructs a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key_base64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Generates a new X25519 keypair.
pub fn generate_key_pair() -> KeyPair {
    let secret = SecretKey::generate(&mut OsRng);
    let public = secret.public_key();
    KeyPair { secret, public }
}

/// Seal `plaintext` so only the holder of `recipient`'s secret key can open it
pub fn encrypt_with_public_key(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>> {
    if plaintext.len() > MAX_SEALED_PLAINTEXT {
        return Err(Error::Encryption(format!(
            "Payload of {} bytes exceeds the {} byte public-key limit",
            plaintext.len(),
            MAX_SEALED_PLAINTEXT
        )));
    }

    let ephemeral = SecretKey::generate(&mut OsRng);
    let ephemeral_pk = ephemeral.public_key();
    let salsa_box = SalsaBox::new(recipient, &ephemeral);

    let mut nonce_bytes = [0u8; BOX_NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| Error::Encryption(format!("Failed to generate nonce: {}", e)))?;

    let ciphertext = salsa_box
        .encrypt(crypto_box::Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| Error::Encryption(format!("Seal failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_SIZE + BOX_NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_pk.as_bytes());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);

    debug!("Sealed {} bytes for public key", plaintext.len());
    Ok(sealed)
}

/// Open a box produced by [`encrypt_with_public_key`]
pub fn decrypt_with_private_key(sealed: &[u8], secret: &SecretKey) -> Result<Vec<u8>> {
    if sealed.len() < PUBLIC_KEY_SIZE + BOX_NONCE_SIZE + BOX_TAG_SIZE {
        return Err(Error::malformed("Sealed box too short"));
    }

    let (pk_bytes, rest) = sealed.split_at(PUBLIC_KEY_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(BOX_NONCE_SIZE);

    let mut ephemeral = [0u8; PUBLIC_KEY_SIZE];
    ephemeral.copy_from_slice(pk_bytes);
    let salsa_box = SalsaBox::new(&PublicKey::from(ephemeral), secret);

    salsa_box
        .decrypt(crypto_box::Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::Decryption(DecryptionError::AuthTagMismatch))
}

/// Parse a base64 X25519 public key
pub fn public_key_from_base64(encoded: &str) -> Result<PublicKey> {
    Ok(PublicKey::from(decode_key(encoded)?))
}

/// Parse a base64 X25519 secret key
pub fn secret_key_from_base64(encoded: &str) -> Result<SecretKey> {
    Ok(SecretKey::from(decode_key(encoded)?))
}

/// Seal to a base64 public key, returning base64
pub fn seal_base64(plaintext: &[u8], public_key: &str) -> Result<String> {
    let recipient = public_key_from_base64(public_key)?;
    Ok(STANDARD.encode(encrypt_with_public_key(plaintext, &recipient)?))
}

/// Open a base64 box with a base64 secret key
pub fn open_base64(sealed: &str, private_key: &str) -> Result<Vec<u8>> {
    let secret = secret_key_from_base64(private_key)?;
    let sealed = STANDARD
        .decode(sealed.trim())
        .map_err(|e| Error::malformed(format!("Invalid base64: {}", e)))?;
    decrypt_with_private_key(&sealed, &secret)
}

fn decode_key(encoded: &str) -> Result<[u8; PUBLIC_KEY_SIZE]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidKey(format!("Invalid base64 key: {}", e)))?;

    bytes.as_slice().try_into().map_err(|_| {
        Error::InvalidKey(format!(
            "Expected {} key bytes, got {}",
            PUBLIC_KEY_SIZE,
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let pair = generate_key_pair();
        let sealed = encrypt_with_public_key(b"session bootstrap secret", &pair.public).unwrap();
        let opened = decrypt_with_private_key(&sealed, &pair.secret).unwrap();
        assert_eq!(opened, b"session bootstrap secret");
    }

    #[test]
    fn test_wrong_secret_key_fails() {
        let alice = generate_key_pair();
        let mallory = generate_key_pair();

        let sealed = encrypt_with_public_key(b"for alice", &alice.public).unwrap();
        let err = decrypt_with_private_key(&sealed, &mallory.secret).unwrap_err();
        assert_eq!(err.decryption_kind(), Some(&DecryptionError::AuthTagMismatch));
    }

    #[test]
    fn test_tampered_box_fails() {
        let pair = generate_key_pair();
        let mut sealed = encrypt_with_public_key(b"payload", &pair.public).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(decrypt_with_private_key(&sealed, &pair.secret).is_err());
    }

    #[test]
    fn test_ephemeral_key_per_seal() {
        let pair = generate_key_pair();
        let a = encrypt_with_public_key(b"same", &pair.public).unwrap();
        let b = encrypt_with_public_key(b"same", &pair.public).unwrap();
        assert_ne!(&a[..PUBLIC_KEY_SIZE], &b[..PUBLIC_KEY_SIZE]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let pair = generate_key_pair();
        let big = vec![0u8; MAX_SEALED_PLAINTEXT + 1];
        assert!(matches!(
            encrypt_with_public_key(&big, &pair.public),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_short_box_is_malformed() {
        let pair = generate_key_pair();
        let err = decrypt_with_private_key(&[0u8; 10], &pair.secret).unwrap_err();
        assert!(matches!(
            err.decryption_kind(),
            Some(DecryptionError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_base64_round_trip() {
        let pair = generate_key_pair();
        let sealed = seal_base64(b"wrapped key", &pair.public_key_base64()).unwrap();
        let opened = open_base64(&sealed, &pair.private_key_base64()).unwrap();
        assert_eq!(opened, b"wrapped key");

        let restored = KeyPair::from_secret_bytes(pair.secret_bytes());
        assert_eq!(restored.public_bytes(), pair.public_bytes());
    }

    #[test]
    fn test_bad_key_encoding() {
        assert!(matches!(
            public_key_from_base64("not base64!"),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            secret_key_from_base64(&STANDARD.encode([1u8; 16])),
            Err(Error::InvalidKey(_))
        ));
    }
}
