//! fieldguard - Field-level data protection toolkit
//!
//! Usage:
//!   fieldguard keygen                  - Generate a master key
//!   fieldguard encrypt <value>         - Encrypt a field value
//!   fieldguard decrypt <envelope>      - Decrypt a field envelope
//!   fieldguard hash-password           - Hash a password
//!   fieldguard serve                   - Run the demo endpoint behind the middleware

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Parser, Subcommand};
use fieldguard::{
    config::{Config, ENV_MASTER_KEY},
    credentials::verify_password_json,
    crypto::{asymmetric, generate_key_pair},
    field::FieldValue,
    middleware::{router_with_boundary, SkipEncryption},
    token::{generate_secure_token, DEFAULT_TOKEN_BYTES},
    DataProtection, Error, Result,
};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Random bytes in a generated master key (64 base64url characters)
const MASTER_KEY_BYTES: usize = 48;

#[derive(Parser)]
#[command(name = "fieldguard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Field-level encryption, password hashing and tokens")]
struct Cli {
    /// Configuration file path (falls back to environment variables if absent)
    #[arg(short, long, default_value = "~/.config/fieldguard/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a random master key
    Keygen,

    /// Encrypt a value into an envelope
    Encrypt {
        /// Value to encrypt
        value: String,

        /// Encryption context (e.g. "user.email")
        #[arg(long)]
        context: Option<String>,

        /// Treat the value as JSON rather than a string
        #[arg(long)]
        json: bool,
    },

    /// Decrypt an envelope
    Decrypt {
        /// Serialized envelope
        envelope: String,

        /// Encryption context used when encrypting
        #[arg(long)]
        context: Option<String>,
    },

    /// Hash a password (prompts if no file given)
    HashPassword {
        /// Read the password from a file
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// Verify a password against a stored record
    VerifyPassword {
        /// Password record as JSON
        record: String,

        /// Read the password from a file
        #[arg(long)]
        password_file: Option<PathBuf>,
    },

    /// Create or verify an HMAC-SHA256
    Mac {
        /// Data to authenticate
        data: String,

        /// Verify this hex MAC instead of creating one
        #[arg(long)]
        verify: Option<String>,
    },

    /// Generate a random URL-safe token
    Token {
        /// Number of random bytes
        #[arg(long, default_value_t = DEFAULT_TOKEN_BYTES)]
        bytes: usize,
    },

    /// Generate an X25519 keypair, or seal/open with one
    Keypair {
        /// Seal this text to the given public key
        #[arg(long, requires = "public_key")]
        seal: Option<String>,

        /// Open this base64 box with the given private key
        #[arg(long, requires = "private_key", conflicts_with = "seal")]
        open: Option<String>,

        /// Recipient public key (base64)
        #[arg(long)]
        public_key: Option<String>,

        /// Private key (base64)
        #[arg(long)]
        private_key: Option<String>,
    },

    /// Serve a demo echo endpoint behind the encryption middleware
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path);

    // Setup logging: RUST_LOG wins, then --verbose, then the config file
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config
            .as_ref()
            .map(|c| c.logging.level.clone())
            .unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    if let Err(e) = run_command(cli.command, config) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(path)
    } else {
        Config::from_env()
    }
}

fn run_command(command: Commands, config: Result<Config>) -> Result<()> {
    match command {
        Commands::Keygen => cmd_keygen(),

        Commands::Encrypt {
            value,
            context,
            json,
        } => cmd_encrypt(config?, value, context, json),

        Commands::Decrypt { envelope, context } => cmd_decrypt(config?, &envelope, context),

        Commands::HashPassword { password_file } => cmd_hash_password(config?, password_file),

        Commands::VerifyPassword {
            record,
            password_file,
        } => cmd_verify_password(&record, password_file),

        Commands::Mac { data, verify } => cmd_mac(config?, &data, verify),

        Commands::Token { bytes } => cmd_token(bytes),

        Commands::Keypair {
            seal,
            open,
            public_key,
            private_key,
        } => cmd_keypair(seal, open, public_key, private_key),

        Commands::Serve { listen } => cmd_serve(config?, &listen),
    }
}

fn cmd_keygen() -> Result<()> {
    let key = generate_secure_token(MASTER_KEY_BYTES)?;
    println!("{}", key);
    eprintln!();
    eprintln!("Store it in {} or the master_key config field.", ENV_MASTER_KEY);
    Ok(())
}

fn cmd_encrypt(config: Config, value: String, context: Option<String>, json: bool) -> Result<()> {
    let protection = DataProtection::from_config(config)?;

    let value = if json {
        let parsed: serde_json::Value = serde_json::from_str(&value)?;
        FieldValue::from(parsed)
    } else {
        FieldValue::String(value)
    };

    let envelope = protection
        .codec()
        .encrypt_field(&value, context.as_deref())?;
    println!("{}", envelope);
    Ok(())
}

fn cmd_decrypt(config: Config, envelope: &str, context: Option<String>) -> Result<()> {
    let protection = DataProtection::from_config(config)?;

    match protection
        .codec()
        .decrypt_field(envelope.trim(), context.as_deref())?
    {
        FieldValue::String(s) => println!("{}", s),
        FieldValue::Json(v) => println!("{}", serde_json::to_string_pretty(&v)?),
    }
    Ok(())
}

fn cmd_hash_password(config: Config, password_file: Option<PathBuf>) -> Result<()> {
    let protection = DataProtection::from_config(config)?;
    let password = read_password(password_file, "Password to hash: ")?;

    let record = protection.hasher().hash_password(&password)?;
    println!("{}", record.to_json()?);
    Ok(())
}

fn cmd_verify_password(record: &str, password_file: Option<PathBuf>) -> Result<()> {
    let password = read_password(password_file, "Password to verify: ")?;

    if verify_password_json(&password, record) {
        println!("valid");
        Ok(())
    } else {
        println!("invalid");
        std::process::exit(2);
    }
}

fn cmd_mac(config: Config, data: &str, verify: Option<String>) -> Result<()> {
    let protection = DataProtection::from_config(config)?;
    let macs = protection.macs();

    match verify {
        Some(mac) => {
            if macs.verify_mac(data.as_bytes(), &mac, None) {
                println!("valid");
            } else {
                println!("invalid");
                std::process::exit(2);
            }
        }
        None => println!("{}", macs.create_mac(data.as_bytes(), None)),
    }
    Ok(())
}

fn cmd_token(bytes: usize) -> Result<()> {
    println!("{}", generate_secure_token(bytes)?);
    Ok(())
}

fn cmd_keypair(
    seal: Option<String>,
    open: Option<String>,
    public_key: Option<String>,
    private_key: Option<String>,
) -> Result<()> {
    match (seal, open) {
        (Some(plaintext), _) => {
            let public_key = public_key
                .ok_or_else(|| Error::InvalidKey("--public-key is required".to_string()))?;
            println!("{}", asymmetric::seal_base64(plaintext.as_bytes(), &public_key)?);
        }
        (None, Some(sealed)) => {
            let private_key = private_key
                .ok_or_else(|| Error::InvalidKey("--private-key is required".to_string()))?;
            let opened = asymmetric::open_base64(&sealed, &private_key)?;
            println!("{}", String::from_utf8_lossy(&opened));
        }
        (None, None) => {
            let pair = generate_key_pair();
            println!("Public key:  {}", pair.public_key_base64());
            println!("Private key: {}", pair.private_key_base64());
        }
    }
    Ok(())
}

fn cmd_serve(config: Config, listen: &str) -> Result<()> {
    let protection = DataProtection::from_config(config)?;
    let state = protection.boundary_state()?;

    let routes = Router::new()
        .route("/echo", post(echo))
        .route("/health", get(health));
    let app = router_with_boundary(routes, state);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(listen).await?;
        info!("Listening on {}", listener.local_addr()?);
        info!(
            "Send {{\"encrypted\":true,\"data\":<envelope>}} to POST /echo with the {} header",
            protection.config().middleware.context_header
        );

        axum::serve(listener, app).await?;
        Ok::<_, Error>(())
    })
}

async fn echo(Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    Json(body)
}

async fn health() -> impl IntoResponse {
    let mut response = (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response();
    response.extensions_mut().insert(SkipEncryption);
    response
}

fn read_password(password_file: Option<PathBuf>, prompt: &str) -> Result<String> {
    match password_file {
        Some(path) => Ok(std::fs::read_to_string(&path)?
            .trim_end_matches(['\r', '\n'])
            .to_string()),
        None => Ok(rpassword::prompt_password(prompt)?),
    }
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
