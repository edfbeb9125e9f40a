//! Configuration system for the `QChat` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/qchat/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use qchat::gateway::RetryPolicy;
use qchat::negotiate::DEFAULT_KEY_LENGTH;
use qchat::pipeline::FallbackPolicy;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct QchatConfigFile {
    server: ServerFileConfig,
    oracle: OracleFileConfig,
    keys: KeysFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

/// `[oracle]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct OracleFileConfig {
    url: Option<String>,
    max_attempts: Option<u32>,
    attempt_timeout_ms: Option<u64>,
    retry_delay_ms: Option<u64>,
    fallback: Option<FallbackPolicy>,
}

/// `[keys]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct KeysFileConfig {
    key_length: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "QChat message server")]
pub struct QchatCliArgs {
    /// Address to bind the HTTP server to.
    #[arg(short, long, env = "QCHAT_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/qchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL of the encryption oracle.
    #[arg(long, env = "QCHAT_ORACLE_URL")]
    pub oracle_url: Option<String>,

    /// Oracle attempts per operation.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Time budget per oracle attempt, in milliseconds.
    #[arg(long)]
    pub attempt_timeout_ms: Option<u64>,

    /// Pause between oracle attempts, in milliseconds.
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Number of candidate positions per key negotiation.
    #[arg(long)]
    pub key_length: Option<usize>,

    /// What to do when encryption is unavailable (plaintext-fallback, reject).
    #[arg(long)]
    pub fallback: Option<FallbackPolicy>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "QCHAT_LOG")]
    pub log_level: String,

    /// Also write logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8000`).
    pub bind_addr: String,
    /// Base URL of the encryption oracle.
    pub oracle_url: String,
    /// Oracle attempts per operation.
    pub max_attempts: u32,
    /// Time budget per oracle attempt.
    pub attempt_timeout: Duration,
    /// Pause between oracle attempts.
    pub retry_delay: Duration,
    /// Candidate positions per negotiation.
    pub key_length: usize,
    /// Behavior when encryption is unavailable.
    pub fallback: FallbackPolicy,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            oracle_url: "http://localhost:5000".to_string(),
            max_attempts: retry.max_attempts,
            attempt_timeout: retry.attempt_timeout,
            retry_delay: retry.retry_delay,
            key_length: DEFAULT_KEY_LENGTH,
            fallback: FallbackPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &QchatCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// The oracle retry policy described by this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: self.attempt_timeout,
            retry_delay: self.retry_delay,
        }
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &QchatCliArgs, file: &QchatConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            oracle_url: cli
                .oracle_url
                .clone()
                .or_else(|| file.oracle.url.clone())
                .unwrap_or(defaults.oracle_url),
            max_attempts: cli
                .max_attempts
                .or(file.oracle.max_attempts)
                .unwrap_or(defaults.max_attempts),
            attempt_timeout: cli
                .attempt_timeout_ms
                .or(file.oracle.attempt_timeout_ms)
                .map_or(defaults.attempt_timeout, Duration::from_millis),
            retry_delay: cli
                .retry_delay_ms
                .or(file.oracle.retry_delay_ms)
                .map_or(defaults.retry_delay, Duration::from_millis),
            key_length: cli
                .key_length
                .or(file.keys.key_length)
                .unwrap_or(defaults.key_length),
            fallback: cli
                .fallback
                .or(file.oracle.fallback)
                .unwrap_or(defaults.fallback),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<QchatConfigFile, ConfigError> {
    let path = match explicit_path {
        Some(p) => {
            let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
                path: p.to_path_buf(),
                source: e,
            })?;
            return Ok(toml::from_str(&contents)?);
        }
        None => match dirs::config_dir() {
            Some(config_dir) => config_dir.join("qchat").join("config.toml"),
            None => return Ok(QchatConfigFile::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QchatConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
