//! Password hashing
//!
//! Records carry their own algorithm and cost parameters. Verification uses
//! what the record says, not the current defaults, so records created under
//! older settings keep verifying after the defaults change.
//!
//! Verification never errors: anything malformed is simply `false`.

use crate::config::PasswordConfig;
use crate::crypto::base64_bytes;
use crate::error::{Error, Result};
use argon2::password_hash::Output;
use argon2::{Argon2, Params, Version};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use tracing::debug;
use zeroize::Zeroizing;

/// Length of the derived password hash in bytes
pub const PASSWORD_HASH_LEN: usize = 64;

/// Length of the per-record salt in bytes
pub const PASSWORD_SALT_LEN: usize = 32;

/// Highest PBKDF2 iteration count a record may carry
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;

/// Highest Argon2 memory cost a record may carry: 1 GiB
pub const MAX_ARGON2_MEMORY_KIB: u32 = 1024 * 1024;

/// Highest Argon2 time cost a record may carry
pub const MAX_ARGON2_ITERATIONS: u32 = 64;

/// Highest Argon2 parallelism a record may carry
pub const MAX_ARGON2_PARALLELISM: u32 = 16;

/// Password derivation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PasswordAlgorithm {
    /// PBKDF2-HMAC-SHA512 (default)
    #[default]
    #[serde(rename = "pbkdf2-sha512")]
    Pbkdf2Sha512,
    /// PBKDF2-HMAC-SHA256
    #[serde(rename = "pbkdf2-sha256")]
    Pbkdf2Sha256,
    /// Argon2id
    #[serde(rename = "argon2id")]
    Argon2id,
}

impl PasswordAlgorithm {
    fn pbkdf2(&self) -> Option<pbkdf2::Algorithm> {
        match self {
            PasswordAlgorithm::Pbkdf2Sha512 => Some(pbkdf2::PBKDF2_HMAC_SHA512),
            PasswordAlgorithm::Pbkdf2Sha256 => Some(pbkdf2::PBKDF2_HMAC_SHA256),
            PasswordAlgorithm::Argon2id => None,
        }
    }
}

/// Stored password hash with the parameters that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRecord {
    #[serde(with = "base64_bytes")]
    pub hash: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    /// PBKDF2 iterations, or Argon2 time cost
    pub iterations: u32,
    pub algorithm: PasswordAlgorithm,
    /// Argon2 memory cost in KiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_kib: Option<u32>,
    /// Argon2 lanes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,
}

impl PasswordRecord {
    /// Serialize for storage
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Creates password records under the configured defaults
pub struct PasswordHasher {
    config: PasswordConfig,
    rng: SystemRandom,
}

impl PasswordHasher {
    /// Create a hasher with `config` as the defaults for new records
    pub fn new(config: &PasswordConfig) -> Result<Self> {
        if config.pbkdf2_iterations == 0 || config.argon2_iterations == 0 {
            return Err(Error::Configuration(
                "Password hashing iterations must be greater than 0".to_string(),
            ));
        }

        if config.pbkdf2_iterations > MAX_PBKDF2_ITERATIONS
            || !argon2_cost_accepted(
                config.argon2_memory_kib,
                config.argon2_iterations,
                config.argon2_parallelism,
            )
        {
            return Err(Error::Configuration(
                "Password hashing cost exceeds the accepted maximum".to_string(),
            ));
        }

        Ok(PasswordHasher {
            config: config.clone(),
            rng: SystemRandom::new(),
        })
    }

    /// Hash `password` with a fresh salt
    pub fn hash_password(&self, password: &str) -> Result<PasswordRecord> {
        let mut salt = vec![0u8; PASSWORD_SALT_LEN];
        self.rng
            .fill(&mut salt)
            .map_err(|_| Error::Hashing("Failed to generate salt".to_string()))?;

        let record = match self.config.algorithm {
            PasswordAlgorithm::Argon2id => {
                let memory_kib = self.config.argon2_memory_kib;
                let parallelism = self.config.argon2_parallelism;
                let iterations = self.config.argon2_iterations;
                let hash = argon2_hash(password, &salt, memory_kib, iterations, parallelism)?;

                PasswordRecord {
                    hash: hash.to_vec(),
                    salt,
                    iterations,
                    algorithm: PasswordAlgorithm::Argon2id,
                    memory_kib: Some(memory_kib),
                    parallelism: Some(parallelism),
                }
            }
            algorithm => {
                let iterations = self.config.pbkdf2_iterations;
                let hash = pbkdf2_hash(algorithm, password, &salt, iterations)?;

                PasswordRecord {
                    hash: hash.to_vec(),
                    salt,
                    iterations,
                    algorithm,
                    memory_kib: None,
                    parallelism: None,
                }
            }
        };

        debug!(
            "Hashed password with {:?} ({} iterations)",
            record.algorithm, record.iterations
        );
        Ok(record)
    }

    /// Check `password` against `record`
    pub fn verify_password(&self, password: &str, record: &PasswordRecord) -> bool {
        verify_password(password, record)
    }

    /// Whether `record` was made with parameters other than the current defaults
    pub fn needs_rehash(&self, record: &PasswordRecord) -> bool {
        if record.algorithm != self.config.algorithm {
            return true;
        }

        match record.algorithm {
            PasswordAlgorithm::Argon2id => {
                record.iterations != self.config.argon2_iterations
                    || record.memory_kib != Some(self.config.argon2_memory_kib)
                    || record.parallelism != Some(self.config.argon2_parallelism)
            }
            _ => record.iterations != self.config.pbkdf2_iterations,
        }
    }
}

/// Check `password` against `record` in constant time
///
/// Returns `false` for a wrong password and for any malformed record,
/// including one whose cost parameters exceed the accepted maximums.
pub fn verify_password(password: &str, record: &PasswordRecord) -> bool {
    if record.hash.len() != PASSWORD_HASH_LEN || record.salt.len() != PASSWORD_SALT_LEN {
        return false;
    }

    match record.algorithm {
        PasswordAlgorithm::Argon2id => {
            let (Some(memory_kib), Some(parallelism)) = (record.memory_kib, record.parallelism)
            else {
                return false;
            };
            if !argon2_cost_accepted(memory_kib, record.iterations, parallelism) {
                return false;
            }

            let (Ok(derived), Ok(expected)) = (
                argon2_hash(password, &record.salt, memory_kib, record.iterations, parallelism),
                Output::new(&record.hash),
            ) else {
                return false;
            };
            // Output equality is constant time
            Output::new(&derived[..]).is_ok_and(|derived| derived == expected)
        }
        algorithm => {
            if record.iterations > MAX_PBKDF2_ITERATIONS {
                return false;
            }
            let (Some(pbkdf2_alg), Some(iterations)) =
                (algorithm.pbkdf2(), NonZeroU32::new(record.iterations))
            else {
                return false;
            };
            pbkdf2::verify(
                pbkdf2_alg,
                iterations,
                &record.salt,
                password.as_bytes(),
                &record.hash,
            )
            .is_ok()
        }
    }
}

fn argon2_cost_accepted(memory_kib: u32, iterations: u32, parallelism: u32) -> bool {
    memory_kib <= MAX_ARGON2_MEMORY_KIB
        && (1..=MAX_ARGON2_ITERATIONS).contains(&iterations)
        && (1..=MAX_ARGON2_PARALLELISM).contains(&parallelism)
}

/// Check `password` against a JSON-serialized record
pub fn verify_password_json(password: &str, record_json: &str) -> bool {
    match serde_json::from_str::<PasswordRecord>(record_json) {
        Ok(record) => verify_password(password, &record),
        Err(_) => false,
    }
}

fn pbkdf2_hash(
    algorithm: PasswordAlgorithm,
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; PASSWORD_HASH_LEN]>> {
    let pbkdf2_alg = algorithm
        .pbkdf2()
        .ok_or_else(|| Error::Hashing(format!("{:?} is not a PBKDF2 algorithm", algorithm)))?;
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| Error::Hashing("Iterations must be greater than 0".to_string()))?;

    let mut output = Zeroizing::new([0u8; PASSWORD_HASH_LEN]);
    pbkdf2::derive(pbkdf2_alg, iterations, salt, password.as_bytes(), &mut output[..]);
    Ok(output)
}

fn argon2_hash(
    password: &str,
    salt: &[u8],
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
) -> Result<Zeroizing<[u8; PASSWORD_HASH_LEN]>> {
    let params = Params::new(memory_kib, iterations, parallelism, Some(PASSWORD_HASH_LEN))
        .map_err(|e| Error::Hashing(format!("Invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; PASSWORD_HASH_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut output[..])
        .map_err(|e| Error::Hashing(format!("Argon2 hashing failed: {}", e)))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PASSWORD_ITERATIONS;
    use crate::test_support::test_config;

    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::new(&test_config().password).unwrap()
    }

    fn argon2_hasher() -> PasswordHasher {
        let mut config = test_config().password;
        config.algorithm = PasswordAlgorithm::Argon2id;
        PasswordHasher::new(&config).unwrap()
    }

    #[test]
    fn test_secret123_scenario() {
        let hasher = PasswordHasher::new(&PasswordConfig::default()).unwrap();
        let record = hasher.hash_password("Secret123!").unwrap();

        assert_eq!(record.iterations, 100_000);
        assert_eq!(record.iterations, DEFAULT_PASSWORD_ITERATIONS);
        assert_eq!(record.algorithm, PasswordAlgorithm::Pbkdf2Sha512);
        assert_eq!(record.hash.len(), PASSWORD_HASH_LEN);

        assert!(verify_password("Secret123!", &record));
        assert!(!verify_password("wrong", &record));
    }

    #[test]
    fn test_salt_never_reused() {
        let hasher = fast_hasher();
        let a = hasher.hash_password("same password").unwrap();
        let b = hasher.hash_password("same password").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_old_iteration_count_still_verifies() {
        let mut config = test_config().password;
        config.pbkdf2_iterations = 25;
        let old = PasswordHasher::new(&config).unwrap();
        let record = old.hash_password("legacy").unwrap();

        let current = fast_hasher();
        assert!(current.verify_password("legacy", &record));
        assert!(current.needs_rehash(&record));
        assert!(!old.needs_rehash(&record));
    }

    #[test]
    fn test_argon2_round_trip() {
        let hasher = argon2_hasher();
        let record = hasher.hash_password("correct horse").unwrap();

        assert_eq!(record.algorithm, PasswordAlgorithm::Argon2id);
        assert!(record.memory_kib.is_some());
        assert!(verify_password("correct horse", &record));
        assert!(!verify_password("battery staple", &record));

        // Current defaults are PBKDF2, so this record should be upgraded
        assert!(fast_hasher().needs_rehash(&record));
    }

    #[test]
    fn test_json_record_round_trip() {
        let hasher = fast_hasher();
        let record = hasher.hash_password("stored").unwrap();
        let json = record.to_json().unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["algorithm"], "pbkdf2-sha512");
        assert!(parsed.get("memoryKib").is_none());

        assert!(verify_password_json("stored", &json));
        assert!(!verify_password_json("other", &json));
    }

    #[test]
    fn test_malformed_records_are_false() {
        let hasher = fast_hasher();
        let record = hasher.hash_password("pw").unwrap();

        let mut zero_iterations = record.clone();
        zero_iterations.iterations = 0;
        assert!(!verify_password("pw", &zero_iterations));

        let mut empty_hash = record.clone();
        empty_hash.hash.clear();
        assert!(!verify_password("pw", &empty_hash));

        let mut argon_without_params = record;
        argon_without_params.algorithm = PasswordAlgorithm::Argon2id;
        assert!(!verify_password("pw", &argon_without_params));

        assert!(!verify_password_json("pw", "not json"));
        assert!(!verify_password_json("pw", r#"{"hash": 5}"#));
        assert!(!verify_password_json(
            "pw",
            r#"{"hash":"AAAA","salt":"AAAA","iterations":1,"algorithm":"md5"}"#
        ));
    }

    #[test]
    fn test_truncated_hash_fails() {
        let hasher = fast_hasher();
        let mut record = hasher.hash_password("pw").unwrap();
        record.hash.truncate(32);
        assert!(!verify_password("pw", &record));
    }

    #[test]
    fn test_one_byte_hash_never_accepts_wrong_passwords() {
        let hasher = fast_hasher();
        let mut record = hasher.hash_password("correct").unwrap();
        record.hash.truncate(1);

        assert!(!verify_password("correct", &record));
        let accepted = (0..2000)
            .filter(|i| verify_password(&format!("wrong-{}", i), &record))
            .count();
        assert_eq!(accepted, 0);
    }

    #[test]
    fn test_wrong_salt_length_fails() {
        let hasher = fast_hasher();
        let record = hasher.hash_password("pw").unwrap();

        let mut short_salt = record.clone();
        short_salt.salt.truncate(16);
        assert!(!verify_password("pw", &short_salt));

        let mut long_salt = record;
        long_salt.salt.push(0);
        assert!(!verify_password("pw", &long_salt));
    }

    #[test]
    fn test_excessive_pbkdf2_iterations_rejected() {
        let hasher = fast_hasher();
        let mut record = hasher.hash_password("pw").unwrap();
        record.iterations = u32::MAX;
        assert!(!verify_password("pw", &record));

        record.iterations = MAX_PBKDF2_ITERATIONS + 1;
        assert!(!verify_password("pw", &record));
    }

    #[test]
    fn test_excessive_argon2_costs_rejected() {
        let record = argon2_hasher().hash_password("pw").unwrap();
        assert!(verify_password("pw", &record));

        let mut huge_memory = record.clone();
        huge_memory.memory_kib = Some(MAX_ARGON2_MEMORY_KIB + 1);
        assert!(!verify_password("pw", &huge_memory));

        huge_memory.memory_kib = Some(u32::MAX);
        let json = huge_memory.to_json().unwrap();
        assert!(!verify_password_json("pw", &json));

        let mut long_time = record.clone();
        long_time.iterations = MAX_ARGON2_ITERATIONS + 1;
        assert!(!verify_password("pw", &long_time));

        let mut wide = record;
        wide.parallelism = Some(MAX_ARGON2_PARALLELISM + 1);
        assert!(!verify_password("pw", &wide));
    }

    #[test]
    fn test_config_above_limits_rejected() {
        let mut config = test_config().password;
        config.argon2_memory_kib = MAX_ARGON2_MEMORY_KIB + 1;
        assert!(matches!(
            PasswordHasher::new(&config),
            Err(Error::Configuration(_))
        ));

        let mut config = test_config().password;
        config.pbkdf2_iterations = MAX_PBKDF2_ITERATIONS + 1;
        assert!(PasswordHasher::new(&config).is_err());
    }
}
