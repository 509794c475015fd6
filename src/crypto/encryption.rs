//! Authenticated field encryption
//!
//! Every call draws a fresh salt and nonce. The AEAD key is derived from the
//! current master key, that salt, and the optional context. The associated
//! data covers the algorithm, the key version, a caller-supplied binding and
//! the context, so none of them can be altered in a stored envelope without
//! failing the tag. Decryption re-derives the key from the envelope's salt
//! and key version and refuses to return anything unless the tag verifies.

use crate::config::CipherConfig;
use crate::crypto::{derive_field_key, KeyManager, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
use crate::error::{DecryptionError, Error, Result};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, CHACHA20_POLY1305};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

/// AEAD algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    /// AES-256-GCM (default)
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// ChaCha20-Poly1305 for hosts without AES acceleration
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl Algorithm {
    /// Identifier written into envelopes
    pub fn id(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "aes-256-gcm",
            Algorithm::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    fn ring_algorithm(&self) -> &'static ring::aead::Algorithm {
        match self {
            Algorithm::Aes256Gcm => &AES_256_GCM,
            Algorithm::ChaCha20Poly1305 => &CHACHA20_POLY1305,
        }
    }
}

/// Everything needed to decrypt, except the master key and the context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedData {
    /// Ciphertext without the tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// Key derivation salt (unique per encryption)
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    /// AEAD nonce (unique per encryption)
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// AEAD authentication tag
    #[serde(with = "base64_bytes")]
    pub auth_tag: Vec<u8>,
    /// AEAD used
    pub algorithm: Algorithm,
    /// Master key version used
    pub key_version: u32,
}

/// Cipher engine bound to a key manager
pub struct Cipher {
    keys: Arc<KeyManager>,
    algorithm: Algorithm,
    iterations: NonZeroU32,
    rng: SystemRandom,
}

impl Cipher {
    /// Create a cipher using `config` for new envelopes
    pub fn new(keys: Arc<KeyManager>, config: &CipherConfig) -> Result<Self> {
        let iterations = NonZeroU32::new(config.kdf_iterations).ok_or_else(|| {
            Error::Configuration("Cipher KDF iterations must be greater than 0".to_string())
        })?;

        Ok(Cipher {
            keys,
            algorithm: config.algorithm,
            iterations,
            rng: SystemRandom::new(),
        })
    }

    /// The key manager this cipher resolves versions against
    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encrypt `plaintext` under the current master key
    pub fn encrypt(&self, plaintext: &[u8], context: Option<&str>) -> Result<EncryptedData> {
        self.encrypt_bound(plaintext, context, &[])
    }

    /// Encrypt, additionally authenticating `binding` (envelope metadata that
    /// must be presented unchanged to decrypt)
    pub fn encrypt_bound(
        &self,
        plaintext: &[u8],
        context: Option<&str>,
        binding: &[u8],
    ) -> Result<EncryptedData> {
        let master = self.keys.current_key();

        let mut salt = vec![0u8; SALT_SIZE];
        self.rng
            .fill(&mut salt)
            .map_err(|_| Error::Encryption("Failed to generate salt".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| Error::Encryption("Failed to generate nonce".to_string()))?;

        let derived = derive_field_key(master.secret(), &salt, context, self.iterations);
        let unbound_key = UnboundKey::new(self.algorithm.ring_algorithm(), &derived[..])
            .map_err(|_| Error::Encryption("Failed to create encryption key".to_string()))?;
        let sealing_key = LessSafeKey::new(unbound_key);

        let aad = associated_data(self.algorithm, master.version(), binding, context);
        let mut in_out = plaintext.to_vec();
        let tag = sealing_key
            .seal_in_place_separate_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(&aad[..]),
                &mut in_out,
            )
            .map_err(|_| Error::Encryption("Encryption failed".to_string()))?;

        debug!(
            "Encrypted {} bytes with {} under key version {}",
            plaintext.len(),
            self.algorithm.id(),
            master.version()
        );

        Ok(EncryptedData {
            ciphertext: in_out,
            salt,
            nonce: nonce_bytes.to_vec(),
            auth_tag: tag.as_ref().to_vec(),
            algorithm: self.algorithm,
            key_version: master.version(),
        })
    }

    /// Decrypt and authenticate `encrypted`
    pub fn decrypt(&self, encrypted: &EncryptedData, context: Option<&str>) -> Result<Vec<u8>> {
        self.decrypt_bound(encrypted, context, &[])
    }

    /// Decrypt data sealed with [`Cipher::encrypt_bound`] and the same `binding`
    pub fn decrypt_bound(
        &self,
        encrypted: &EncryptedData,
        context: Option<&str>,
        binding: &[u8],
    ) -> Result<Vec<u8>> {
        if encrypted.salt.len() != SALT_SIZE {
            return Err(Error::malformed(format!(
                "Invalid salt length: {}",
                encrypted.salt.len()
            )));
        }

        let nonce_bytes: [u8; NONCE_SIZE] =
            encrypted.nonce.as_slice().try_into().map_err(|_| {
                Error::malformed(format!("Invalid nonce length: {}", encrypted.nonce.len()))
            })?;

        if encrypted.auth_tag.len() != TAG_SIZE {
            return Err(Error::malformed(format!(
                "Invalid tag length: {}",
                encrypted.auth_tag.len()
            )));
        }

        let master = self.keys.key_for_version(encrypted.key_version)?;

        let derived = derive_field_key(master.secret(), &encrypted.salt, context, self.iterations);
        let unbound_key = UnboundKey::new(encrypted.algorithm.ring_algorithm(), &derived[..])
            .map_err(|_| Error::malformed("Failed to create decryption key"))?;
        let opening_key = LessSafeKey::new(unbound_key);

        let mut in_out = Vec::with_capacity(encrypted.ciphertext.len() + TAG_SIZE);
        in_out.extend_from_slice(&encrypted.ciphertext);
        in_out.extend_from_slice(&encrypted.auth_tag);

        let aad = associated_data(encrypted.algorithm, encrypted.key_version, binding, context);
        let plaintext = opening_key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(&aad[..]),
                &mut in_out,
            )
            .map_err(|_| Error::Decryption(DecryptionError::AuthTagMismatch))?;

        Ok(plaintext.to_vec())
    }
}

/// `len(alg) || alg || key_version || len(binding) || binding || context`
fn associated_data(
    algorithm: Algorithm,
    key_version: u32,
    binding: &[u8],
    context: Option<&str>,
) -> Vec<u8> {
    let id = algorithm.id().as_bytes();
    let context = context.unwrap_or("").as_bytes();

    let mut aad = Vec::with_capacity(1 + id.len() + 4 + 4 + binding.len() + context.len());
    aad.push(id.len() as u8);
    aad.extend_from_slice(id);
    aad.extend_from_slice(&key_version.to_be_bytes());
    aad.extend_from_slice(&(binding.len() as u32).to_be_bytes());
    aad.extend_from_slice(binding);
    aad.extend_from_slice(context);
    aad
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_cipher, test_keys, FAST_ITERATIONS};

    fn assert_tag_mismatch(result: Result<Vec<u8>>) {
        match result {
            Err(Error::Decryption(DecryptionError::AuthTagMismatch)) => {}
            other => panic!("expected AuthTagMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = test_cipher();
        let plaintext = b"Hello, fieldguard!";

        let encrypted = cipher.encrypt(plaintext, None).unwrap();
        let decrypted = cipher.decrypt(&encrypted, None).unwrap();

        assert_eq!(decrypted, plaintext);
        assert_eq!(encrypted.algorithm, Algorithm::Aes256Gcm);
        assert_eq!(encrypted.key_version, 1);
        assert_eq!(encrypted.salt.len(), SALT_SIZE);
        assert_eq!(encrypted.nonce.len(), NONCE_SIZE);
        assert_eq!(encrypted.auth_tag.len(), TAG_SIZE);
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = test_cipher();

        let encrypted = cipher.encrypt(b"", Some("users.note")).unwrap();
        assert!(encrypted.ciphertext.is_empty());

        let decrypted = cipher.decrypt(&encrypted, Some("users.note")).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_wrong_context_fails() {
        let cipher = test_cipher();

        let encrypted = cipher.encrypt(b"Secret data", Some("user.email")).unwrap();
        assert_tag_mismatch(cipher.decrypt(&encrypted, Some("user.phone")));
        assert_tag_mismatch(cipher.decrypt(&encrypted, None));
    }

    #[test]
    fn test_every_bit_flip_detected() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt(b"abc", None).unwrap();

        for byte in 0..encrypted.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = encrypted.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert_tag_mismatch(cipher.decrypt(&tampered, None));
            }
        }

        for byte in 0..encrypted.auth_tag.len() {
            for bit in 0..8 {
                let mut tampered = encrypted.clone();
                tampered.auth_tag[byte] ^= 1 << bit;
                assert_tag_mismatch(cipher.decrypt(&tampered, None));
            }
        }
    }

    #[test]
    fn test_non_deterministic() {
        let cipher = test_cipher();

        let a = cipher.encrypt(b"same input", Some("ctx")).unwrap();
        let b = cipher.encrypt(b"same input", Some("ctx")).unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_rotation() {
        let cipher = test_cipher();
        let old = cipher.encrypt(b"before rotation", None).unwrap();

        cipher
            .keys()
            .rotate("a-brand-new-master-key-for-version-2")
            .unwrap();

        let new = cipher.encrypt(b"after rotation", None).unwrap();
        assert_eq!(old.key_version, 1);
        assert_eq!(new.key_version, 2);
        assert_eq!(cipher.decrypt(&old, None).unwrap(), b"before rotation");
        assert_eq!(cipher.decrypt(&new, None).unwrap(), b"after rotation");
    }

    #[test]
    fn test_unknown_key_version() {
        let cipher = test_cipher();
        let mut encrypted = cipher.encrypt(b"data", None).unwrap();
        encrypted.key_version = 42;

        let err = cipher.decrypt(&encrypted, None).unwrap_err();
        assert_eq!(
            err.decryption_kind(),
            Some(&DecryptionError::UnknownKeyVersion(42))
        );
    }

    #[test]
    fn test_bad_lengths_are_malformed() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt(b"data", None).unwrap();

        let mut short_nonce = encrypted.clone();
        short_nonce.nonce.pop();
        let mut short_salt = encrypted.clone();
        short_salt.salt.truncate(4);
        let mut short_tag = encrypted;
        short_tag.auth_tag.truncate(8);

        for bad in [short_nonce, short_salt, short_tag] {
            let err = cipher.decrypt(&bad, None).unwrap_err();
            assert!(matches!(
                err.decryption_kind(),
                Some(DecryptionError::MalformedEnvelope(_))
            ));
        }
    }

    #[test]
    fn test_chacha_envelope_opens_with_aes_configured_cipher() {
        let keys = test_keys();
        let chacha = Cipher::new(
            keys.clone(),
            &CipherConfig {
                algorithm: Algorithm::ChaCha20Poly1305,
                kdf_iterations: FAST_ITERATIONS,
            },
        )
        .unwrap();
        let aes = Cipher::new(
            keys,
            &CipherConfig {
                algorithm: Algorithm::Aes256Gcm,
                kdf_iterations: FAST_ITERATIONS,
            },
        )
        .unwrap();

        let encrypted = chacha.encrypt(b"portable", None).unwrap();
        assert_eq!(encrypted.algorithm, Algorithm::ChaCha20Poly1305);
        assert_eq!(aes.decrypt(&encrypted, None).unwrap(), b"portable");
    }

    #[test]
    fn test_other_master_key_fails() {
        let cipher = test_cipher();
        let other = Cipher::new(
            Arc::new(KeyManager::new("a-completely-different-master-key!", None).unwrap()),
            &CipherConfig {
                algorithm: Algorithm::Aes256Gcm,
                kdf_iterations: FAST_ITERATIONS,
            },
        )
        .unwrap();

        let encrypted = cipher.encrypt(b"Secret data", None).unwrap();
        assert_tag_mismatch(other.decrypt(&encrypted, None));
    }

    #[test]
    fn test_binding_is_authenticated() {
        let cipher = test_cipher();
        let encrypted = cipher
            .encrypt_bound(b"bound", Some("ctx"), b"kind=json")
            .unwrap();

        assert_eq!(
            cipher
                .decrypt_bound(&encrypted, Some("ctx"), b"kind=json")
                .unwrap(),
            b"bound"
        );
        assert_tag_mismatch(cipher.decrypt_bound(&encrypted, Some("ctx"), b"kind=string"));
        assert_tag_mismatch(cipher.decrypt(&encrypted, Some("ctx")));
    }

    #[test]
    fn test_algorithm_label_is_authenticated() {
        let keys = test_keys();
        let chacha = Cipher::new(
            keys,
            &CipherConfig {
                algorithm: Algorithm::ChaCha20Poly1305,
                kdf_iterations: FAST_ITERATIONS,
            },
        )
        .unwrap();

        let mut encrypted = chacha.encrypt(b"data", None).unwrap();
        encrypted.algorithm = Algorithm::Aes256Gcm;
        assert_tag_mismatch(chacha.decrypt(&encrypted, None));
    }

    #[test]
    fn test_key_version_label_is_authenticated() {
        let cipher = test_cipher();
        let encrypted = cipher.encrypt(b"data", None).unwrap();

        // Same secret registered again under a new version number
        cipher
            .keys()
            .rotate(crate::test_support::TEST_MASTER_KEY)
            .unwrap();
        let mut relabeled = encrypted;
        relabeled.key_version = 2;
        assert_tag_mismatch(cipher.decrypt(&relabeled, None));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let config = CipherConfig {
            algorithm: Algorithm::Aes256Gcm,
            kdf_iterations: 0,
        };
        assert!(matches!(
            Cipher::new(test_keys(), &config),
            Err(Error::Configuration(_))
        ));
    }
}
