//! Shared server state.
//!
//! [`AppState`] is built once from the loaded configuration and shared by
//! every request through an `Arc`. It owns nothing mutable apart from the
//! atomic metric counters and the rate limiter cells.

use crate::config::Config;
use crate::error::ServerError;
use crate::limits::RateLimits;
use crate::password;
use crate::reconcile::{BatchLimits, Reconciler};
use crate::storage::{normalize_identity, AccountStore, SqliteStorage};
use crate::token::TokenIssuer;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Operational metrics for monitoring server activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Successful logins.
    pub logins_total: AtomicU64,
    /// Logins rejected for bad credentials.
    pub login_failures_total: AtomicU64,
    /// Sync batches committed.
    pub syncs_total: AtomicU64,
    /// Sync batches rejected or rolled back.
    pub sync_failures_total: AtomicU64,
    /// Record mutations committed.
    pub operations_applied_total: AtomicU64,
    /// Operations dropped for carrying a zero id.
    pub operations_skipped_total: AtomicU64,
    /// Requests rejected by the authentication gate.
    pub auth_failures_total: AtomicU64,
    /// Requests rejected by a rate limiter.
    pub rate_limit_hits_total: AtomicU64,
}

/// Everything a request handler needs.
pub struct AppState {
    config: Config,
    storage: Arc<SqliteStorage>,
    tokens: TokenIssuer,
    reconciler: Reconciler,
    rate_limits: RateLimits,
    metrics: ServerMetrics,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .field("reconciler", &self.reconciler)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build the state from a validated config and an opened store.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let storage = Arc::new(storage);
        let tokens = TokenIssuer::from_config(&config.auth);
        let reconciler = Reconciler::new(storage.clone(), BatchLimits::from(&config.storage));
        let rate_limits = RateLimits::new(&config.limits);

        Self {
            config,
            storage,
            tokens,
            reconciler,
            rate_limits,
            metrics: ServerMetrics::default(),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Token issuer and validator.
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Batch reconciler.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Get the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get the operational metrics.
    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    /// Create the configured admin account if its identity is not taken.
    ///
    /// Returns `true` if an account was created. An existing account keeps
    /// its password and role.
    pub async fn bootstrap_admin(&self) -> Result<bool, ServerError> {
        let (Some(identity), Some(password)) = (
            self.config.auth.admin_identity.as_deref(),
            self.config.auth.admin_password.as_deref(),
        ) else {
            return Ok(false);
        };
        let identity = normalize_identity(identity);

        if self.storage.get_account_by_identity(identity).await?.is_some() {
            tracing::debug!("Admin account {} already exists", identity);
            return Ok(false);
        }

        let hash = password::hash_password_async(password.to_string()).await?;
        let created = self.storage.ensure_admin(identity, &hash).await?;
        if created {
            tracing::info!("Created admin account {}", identity);
        }
        Ok(created)
    }
}
