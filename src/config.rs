//! Configuration management for fieldguard

use crate::credentials::PasswordAlgorithm;
use crate::crypto::Algorithm;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Minimum accepted master key length, in characters
pub const MIN_MASTER_KEY_LEN: usize = 32;

/// Default PBKDF2 iterations for per-field key derivation
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Default PBKDF2 iterations for password records
pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 100_000;

/// Default request header carrying the encryption context
pub const DEFAULT_CONTEXT_HEADER: &str = "x-encryption-context";

/// Default maximum body size the middleware will buffer: 2MB
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Environment variable overriding the master key
pub const ENV_MASTER_KEY: &str = "FIELDGUARD_MASTER_KEY";

/// Environment variable overriding the rotation interval
pub const ENV_KEY_ROTATION_DAYS: &str = "FIELDGUARD_KEY_ROTATION_DAYS";

/// Main configuration structure
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Master key material (at least 32 characters)
    #[serde(default)]
    pub master_key: String,

    /// Rotation interval in days (None = manual rotation only)
    #[serde(default)]
    pub key_rotation_days: Option<u32>,

    /// Field cipher settings
    #[serde(default)]
    pub cipher: CipherConfig,

    /// Password hashing settings
    #[serde(default)]
    pub password: PasswordConfig,

    /// HTTP boundary settings
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Derivation pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Field cipher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// AEAD used for new envelopes
    pub algorithm: Algorithm,

    /// PBKDF2 iterations for the per-call key
    pub kdf_iterations: u32,
}

/// Password hashing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Algorithm for new records
    pub algorithm: PasswordAlgorithm,

    /// PBKDF2 iterations
    pub pbkdf2_iterations: u32,

    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,

    /// Argon2 parallelism
    pub argon2_parallelism: u32,
}

/// HTTP boundary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Header carrying the encryption context
    pub context_header: String,

    /// Largest body the middleware will buffer
    pub max_body_bytes: usize,
}

/// Derivation pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent derivations (0 = available parallelism)
    pub max_concurrent: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            master_key: String::new(),
            key_rotation_days: None,
            cipher: CipherConfig::default(),
            password: PasswordConfig::default(),
            middleware: MiddlewareConfig::default(),
            pool: PoolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CipherConfig {
    fn default() -> Self {
        CipherConfig {
            algorithm: Algorithm::default(),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        PasswordConfig {
            algorithm: PasswordAlgorithm::default(),
            pbkdf2_iterations: DEFAULT_PASSWORD_ITERATIONS,
            argon2_memory_kib: 19 * 1024, // 19 MiB
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        MiddlewareConfig {
            context_header: DEFAULT_CONTEXT_HEADER.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig { max_concurrent: 0 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("master_key", &"[REDACTED]")
            .field("key_rotation_days", &self.key_rotation_days)
            .field("cipher", &self.cipher)
            .field("password", &self.password)
            .field("middleware", &self.middleware)
            .field("pool", &self.pool)
            .field("logging", &self.logging)
            .finish()
    }
}

impl Config {
    /// Default configuration around the given master key, validated
    pub fn with_master_key(master_key: impl Into<String>) -> Result<Self> {
        let config = Config {
            master_key: master_key.into(),
            ..Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file (YAML or JSON), with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|e| {
            Error::Configuration(format!("Failed to read config file: {}", e))
        })?;

        let content = substitute_env_vars(&content);

        let ext = path_ref.extension().and_then(|s| s.to_str());
        let mut config: Config = if ext == Some("yaml") || ext == Some("yml") {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Configuration(format!("Failed to parse YAML config: {}", e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                Error::Configuration(format!("Failed to parse JSON config: {}", e))
            })?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Create a config from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides()?;

        if config.master_key.is_empty() {
            return Err(Error::Configuration(format!(
                "{} environment variable is required",
                ENV_MASTER_KEY
            )));
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(key) = std::env::var(ENV_MASTER_KEY) {
            let key = key.trim().to_string();
            if !key.is_empty() {
                self.master_key = key;
            }
        }

        if let Ok(days) = std::env::var(ENV_KEY_ROTATION_DAYS) {
            let days = days.trim().parse::<u32>().map_err(|_| {
                Error::Configuration(format!("Invalid {}", ENV_KEY_ROTATION_DAYS))
            })?;
            self.key_rotation_days = Some(days);
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_master_key(&self.master_key)?;

        if self.key_rotation_days == Some(0) {
            return Err(Error::Configuration(
                "Key rotation interval must be a positive number of days".to_string(),
            ));
        }

        if self.cipher.kdf_iterations == 0 {
            return Err(Error::Configuration(
                "Cipher KDF iterations must be greater than 0".to_string(),
            ));
        }

        if self.password.pbkdf2_iterations == 0 || self.password.argon2_iterations == 0 {
            return Err(Error::Configuration(
                "Password hashing iterations must be greater than 0".to_string(),
            ));
        }

        if self.password.argon2_parallelism == 0 {
            return Err(Error::Configuration(
                "Argon2 parallelism must be greater than 0".to_string(),
            ));
        }

        axum::http::HeaderName::from_bytes(self.middleware.context_header.as_bytes()).map_err(
            |_| {
                Error::Configuration(format!(
                    "Invalid context header name: {:?}",
                    self.middleware.context_header
                ))
            },
        )?;

        if self.middleware.max_body_bytes == 0 {
            return Err(Error::Configuration(
                "Maximum body size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fieldguard")
            .join("config.json")
    }
}

/// Reject master keys shorter than [`MIN_MASTER_KEY_LEN`] characters
pub fn validate_master_key(key: &str) -> Result<()> {
    let len = key.chars().count();
    if len < MIN_MASTER_KEY_LEN {
        return Err(Error::Configuration(format!(
            "Master key must be at least {} characters (got {})",
            MIN_MASTER_KEY_LEN, len
        )));
    }
    Ok(())
}

/// Substitute environment variables in config content
/// Supports ${VAR_NAME} syntax
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(full_match, &value);
        }
    }

    result
}
