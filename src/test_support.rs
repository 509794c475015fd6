//! Shared fixtures for unit tests

use crate::config::{CipherConfig, Config};
use crate::crypto::{Cipher, KeyManager};
use crate::field::FieldCodec;
use std::sync::Arc;

pub(crate) const TEST_MASTER_KEY: &str = "test-master-key-0123456789abcdef";

/// Low iteration count so tests stay fast; production defaults are tested separately
pub(crate) const FAST_ITERATIONS: u32 = 10;

pub(crate) fn test_config() -> Config {
    let mut config = Config::with_master_key(TEST_MASTER_KEY).unwrap();
    config.cipher.kdf_iterations = FAST_ITERATIONS;
    config.password.pbkdf2_iterations = FAST_ITERATIONS;
    config.password.argon2_memory_kib = 64;
    config.password.argon2_iterations = 1;
    config.pool.max_concurrent = 2;
    config
}

pub(crate) fn test_keys() -> Arc<KeyManager> {
    Arc::new(KeyManager::new(TEST_MASTER_KEY, None).unwrap())
}

pub(crate) fn test_cipher() -> Cipher {
    Cipher::new(
        test_keys(),
        &CipherConfig {
            kdf_iterations: FAST_ITERATIONS,
            ..CipherConfig::default()
        },
    )
    .unwrap()
}

pub(crate) fn test_codec() -> FieldCodec {
    FieldCodec::new(Arc::new(test_cipher()))
}
