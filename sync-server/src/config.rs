//! Configuration loading for otpsync-server.
//!
//! Configuration is loaded from a TOML file (default: `server.toml`), then
//! selected fields are overridden from `OTPSYNC_*` environment variables so
//! secrets can stay out of the file.

use serde::Deserialize;
use std::path::PathBuf;

/// Minimum signing secret length in bytes.
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

/// Root configuration for otpsync-server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Token and bootstrap account configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Maintenance task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener (default: 0.0.0.0:3000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum request body size in bytes (default: 1MB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Connection pool size (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Maximum size of one encrypted record in bytes (default: 64KB).
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
    /// Maximum number of operations in one sync batch (default: 10000).
    #[serde(default = "default_max_batch_operations")]
    pub max_batch_operations: usize,
}

/// Token and bootstrap account configuration.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing secret for tokens and identity salts.
    #[serde(default)]
    pub signing_secret: String,
    /// Token lifetime in seconds (default: 72 hours).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Re-check the account behind every token against the store (default: true).
    ///
    /// When enabled, deleted accounts, changed identities and demoted admins
    /// lose access immediately instead of at token expiry.
    #[serde(default = "default_verify_account_state")]
    pub verify_account_state: bool,
    /// Identity of the admin account created at startup if missing.
    pub admin_identity: Option<String>,
    /// Password of the bootstrap admin account.
    pub admin_password: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("verify_account_state", &self.verify_account_state)
            .field("admin_identity", &self.admin_identity)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Requests per minute across all clients (default: 20).
    #[serde(default = "default_global_requests_per_minute")]
    pub global_requests_per_minute: u32,
    /// Login attempts per minute per client IP (default: 5).
    #[serde(default = "default_login_requests_per_minute")]
    pub login_requests_per_minute: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (default: info).
    /// `off` disables logging.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Maintenance task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Interval in seconds between rate limiter evictions (default: 300).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable the maintenance task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_database_path() -> PathBuf {
    PathBuf::from("otpsync.db")
}

fn default_max_connections() -> u32 {
    10
}

fn default_max_record_bytes() -> usize {
    64 * 1024 // 64KB
}

fn default_max_batch_operations() -> usize {
    10_000
}

fn default_token_ttl() -> u64 {
    72 * 60 * 60 // 72 hours in seconds
}

fn default_verify_account_state() -> bool {
    true
}

fn default_global_requests_per_minute() -> u32 {
    20
}

fn default_login_requests_per_minute() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_connections: default_max_connections(),
            max_record_bytes: default_max_record_bytes(),
            max_batch_operations: default_max_batch_operations(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            token_ttl_secs: default_token_ttl(),
            verify_account_state: default_verify_account_state(),
            admin_identity: None,
            admin_password: None,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global_requests_per_minute: default_global_requests_per_minute(),
            login_requests_per_minute: default_login_requests_per_minute(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: defaults are used and the environment
    /// is expected to supply the signing secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load from a file, apply environment overrides and validate.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `OTPSYNC_*` variables.
    ///
    /// Takes a lookup function so tests don't have to mutate the process
    /// environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("OTPSYNC_BIND") {
            self.server.bind_address = v;
        }
        if let Some(v) = lookup("OTPSYNC_DATABASE") {
            self.storage.database = PathBuf::from(v);
        }
        if let Some(v) = lookup("OTPSYNC_SIGNING_SECRET") {
            self.auth.signing_secret = v;
        }
        if let Some(v) = lookup("OTPSYNC_ADMIN_IDENTITY") {
            self.auth.admin_identity = Some(v);
        }
        if let Some(v) = lookup("OTPSYNC_ADMIN_PASSWORD") {
            self.auth.admin_password = Some(v);
        }
        if let Some(v) = lookup("OTPSYNC_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Check invariants the rest of the server relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "auth.signing_secret must be at least {} bytes",
                    MIN_SIGNING_SECRET_LEN
                ),
            });
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "auth.token_ttl_secs must be > 0".to_string(),
            });
        }
        if self.limits.global_requests_per_minute == 0
            || self.limits.login_requests_per_minute == 0
        {
            return Err(ConfigError::Invalid {
                reason: "rate limits must be > 0".to_string(),
            });
        }
        if self.cleanup.enabled && self.cleanup.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "cleanup.interval_secs must be > 0".to_string(),
            });
        }
        if self.auth.admin_identity.is_some() != self.auth.admin_password.is_some() {
            return Err(ConfigError::Invalid {
                reason: "auth.admin_identity and auth.admin_password must be set together"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Configuration parsed but is unusable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}
