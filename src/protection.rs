//! Everything built from one [`Config`]
//!
//! Constructs the key manager once and shares it between the cipher, the
//! MAC service and the middleware. The async helpers move derivations off
//! the executor through the [`DerivationPool`].

use crate::config::Config;
use crate::credentials::{PasswordHasher, PasswordRecord};
use crate::crypto::{Cipher, KeyManager};
use crate::error::Result;
use crate::field::{FieldCodec, FieldValue};
use crate::middleware::BoundaryState;
use crate::pool::DerivationPool;
use crate::token::MacService;
use std::sync::Arc;
use tracing::info;

pub struct DataProtection {
    config: Config,
    keys: Arc<KeyManager>,
    codec: Arc<FieldCodec>,
    hasher: Arc<PasswordHasher>,
    macs: MacService,
    pool: DerivationPool,
}

impl DataProtection {
    /// Validate `config` and build all services from it
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        let keys = Arc::new(KeyManager::from_config(&config)?);
        let cipher = Arc::new(Cipher::new(keys.clone(), &config.cipher)?);
        let codec = Arc::new(FieldCodec::new(cipher));
        let hasher = Arc::new(PasswordHasher::new(&config.password)?);
        let macs = MacService::new(keys.clone());
        let pool = DerivationPool::from_config(&config.pool);

        info!(
            "Data protection ready: {} cipher, key version {} ({}), {} derivation slots",
            config.cipher.algorithm.id(),
            keys.current_version(),
            keys.current_key().fingerprint(),
            pool.capacity()
        );

        Ok(DataProtection {
            config,
            keys,
            codec,
            hasher,
            macs,
            pool,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn keys(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    pub fn codec(&self) -> &Arc<FieldCodec> {
        &self.codec
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub fn macs(&self) -> &MacService {
        &self.macs
    }

    pub fn pool(&self) -> &DerivationPool {
        &self.pool
    }

    /// Middleware state sharing this instance's codec and pool
    pub fn boundary_state(&self) -> Result<Arc<BoundaryState>> {
        Ok(Arc::new(BoundaryState::new(
            self.codec.clone(),
            self.pool.clone(),
            &self.config.middleware,
        )?))
    }

    /// [`FieldCodec::encrypt_field`] on the derivation pool
    pub async fn encrypt_field_async(
        &self,
        value: FieldValue,
        context: Option<String>,
    ) -> Result<String> {
        let codec = self.codec.clone();
        self.pool
            .run(move || codec.encrypt_field(&value, context.as_deref()))
            .await
    }

    /// [`FieldCodec::decrypt_field`] on the derivation pool
    pub async fn decrypt_field_async(
        &self,
        serialized: String,
        context: Option<String>,
    ) -> Result<FieldValue> {
        let codec = self.codec.clone();
        self.pool
            .run(move || codec.decrypt_field(&serialized, context.as_deref()))
            .await
    }

    /// [`PasswordHasher::hash_password`] on the derivation pool
    pub async fn hash_password_async(&self, password: String) -> Result<PasswordRecord> {
        let hasher = self.hasher.clone();
        self.pool.run(move || hasher.hash_password(&password)).await
    }

    /// [`PasswordHasher::verify_password`] on the derivation pool
    ///
    /// A pool failure counts as a failed verification.
    pub async fn verify_password_async(&self, password: String, record: PasswordRecord) -> bool {
        let hasher = self.hasher.clone();
        self.pool
            .run(move || Ok(hasher.verify_password(&password, &record)))
            .await
            .unwrap_or(false)
    }
}
