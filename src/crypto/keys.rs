//! Key Management for fieldguard
//!
//! Holds every master key version that may still be referenced by stored
//! envelopes. Exactly one version is current; new encryptions use it, and
//! older versions stay available for decryption until purged.
//!
//! The table itself is immutable. Readers take a brief shared read lock to
//! clone the `Arc` to the current table, then release it before doing any
//! crypto. Reads are not lock-free: a rotation or purge holds the write lock
//! while it builds the new table and swaps it in with a single assignment.

use crate::config::{validate_master_key, Config};
use crate::error::{DecryptionError, Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

/// One version of master key material
pub struct KeyMaterial {
    secret: Zeroizing<Vec<u8>>,
    version: u32,
    created_at: DateTime<Utc>,
}

impl KeyMaterial {
    /// Create key material created now
    pub fn new(secret: &str, version: u32) -> Result<Self> {
        Self::new_at(secret, version, Utc::now())
    }

    /// Create key material with an explicit creation time
    pub fn new_at(secret: &str, version: u32, created_at: DateTime<Utc>) -> Result<Self> {
        validate_master_key(secret)?;

        Ok(KeyMaterial {
            secret: Zeroizing::new(secret.as_bytes().to_vec()),
            version,
            created_at,
        })
    }

    /// Get the raw secret bytes
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Get the key version
    pub fn version(&self) -> u32 {
        self.version
    }

    /// When this version was introduced
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Short, non-secret identifier for logs
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(&self.secret);
        hex::encode(&digest.as_bytes()[..8])
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .field("fingerprint", &self.fingerprint())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

struct KeyTable {
    current: u32,
    keys: BTreeMap<u32, Arc<KeyMaterial>>,
}

/// Versioned master key store
pub struct KeyManager {
    table: RwLock<Arc<KeyTable>>,
    rotation_interval: Option<Duration>,
}

impl KeyManager {
    /// Create a key manager with `master_key` as version 1
    pub fn new(master_key: &str, rotation_days: Option<u32>) -> Result<Self> {
        Self::with_initial(KeyMaterial::new(master_key, 1)?, rotation_days)
    }

    /// Create a key manager from an existing key version
    pub fn with_initial(initial: KeyMaterial, rotation_days: Option<u32>) -> Result<Self> {
        if rotation_days == Some(0) {
            return Err(Error::Configuration(
                "Key rotation interval must be a positive number of days".to_string(),
            ));
        }

        info!(
            "Key manager initialized at version {} (fingerprint {})",
            initial.version(),
            initial.fingerprint()
        );

        let current = initial.version();
        let mut keys = BTreeMap::new();
        keys.insert(current, Arc::new(initial));

        Ok(KeyManager {
            table: RwLock::new(Arc::new(KeyTable { current, keys })),
            rotation_interval: rotation_days.map(|days| Duration::days(i64::from(days))),
        })
    }

    /// Create a key manager from validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.master_key, config.key_rotation_days)
    }

    fn snapshot(&self) -> Arc<KeyTable> {
        self.table.read().clone()
    }

    /// The key new encryptions must use
    pub fn current_key(&self) -> Arc<KeyMaterial> {
        let table = self.snapshot();
        // The current version is never removed from its own table
        table.keys[&table.current].clone()
    }

    /// Version of the current key
    pub fn current_version(&self) -> u32 {
        self.snapshot().current
    }

    /// Look up a key by version for decryption
    pub fn key_for_version(&self, version: u32) -> Result<Arc<KeyMaterial>> {
        self.snapshot()
            .keys
            .get(&version)
            .cloned()
            .ok_or(Error::Decryption(DecryptionError::UnknownKeyVersion(version)))
    }

    /// Append a new key version and make it current
    pub fn rotate(&self, new_secret: &str) -> Result<u32> {
        let mut guard = self.table.write();

        let version = guard.current.checked_add(1).ok_or_else(|| {
            Error::Configuration("Key version space exhausted".to_string())
        })?;
        let material = Arc::new(KeyMaterial::new(new_secret, version)?);

        let mut keys = guard.keys.clone();
        keys.insert(version, material.clone());
        *guard = Arc::new(KeyTable {
            current: version,
            keys,
        });

        info!(
            "Rotated master key to version {} (fingerprint {})",
            version,
            material.fingerprint()
        );
        Ok(version)
    }

    /// Remove a retired key version
    ///
    /// Envelopes still referencing it will fail with `UnknownKeyVersion`.
    pub fn purge(&self, version: u32) -> Result<()> {
        let mut guard = self.table.write();

        if version == guard.current {
            return Err(Error::Configuration(format!(
                "Cannot purge current key version {}",
                version
            )));
        }
        if !guard.keys.contains_key(&version) {
            return Err(Error::Decryption(DecryptionError::UnknownKeyVersion(version)));
        }

        let current = guard.current;
        let mut keys = guard.keys.clone();
        keys.remove(&version);
        *guard = Arc::new(KeyTable { current, keys });

        info!("Purged master key version {}", version);
        Ok(())
    }

    /// All retained versions, ascending
    pub fn versions(&self) -> Vec<u32> {
        self.snapshot().keys.keys().copied().collect()
    }

    /// Whether the current key is older than the rotation interval
    pub fn rotation_due(&self, now: DateTime<Utc>) -> bool {
        match self.rotation_interval {
            Some(interval) => now - self.current_key().created_at() >= interval,
            None => false,
        }
    }
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.snapshot();
        f.debug_struct("KeyManager")
            .field("current", &table.current)
            .field("versions", &table.keys.keys().collect::<Vec<_>>())
            .field("rotation_interval", &self.rotation_interval)
            .finish()
    }
}
