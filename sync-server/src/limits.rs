//! Rate limiting for otpsync-server.
//!
//! Two limiters guard the HTTP surface, both keyed by client IP:
//! - a **global** limiter applied to every request
//! - a **login** limiter on `/api/v1/login`, slowing password guessing
//!
//! Both use the governor crate with a DashMap-backed keyed store, so one
//! noisy client cannot exhaust another client's budget.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limiters for the server.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits login attempts per client IP.
    login_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Limits every request per client IP.
    global_limiter: Arc<KeyedLimiter<IpAddr>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("login_limiter", &"KeyedLimiter<IpAddr>")
            .field("login_keys", &self.login_limiter.len())
            .field("global_keys", &self.global_limiter.len())
            .finish()
    }
}

fn per_minute(value: u32) -> Quota {
    // Zero is rejected by Config::validate; clamp rather than panic here.
    Quota::per_minute(NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN))
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            login_limiter: Arc::new(RateLimiter::keyed(per_minute(
                config.login_requests_per_minute,
            ))),
            global_limiter: Arc::new(RateLimiter::keyed(per_minute(
                config.global_requests_per_minute,
            ))),
        }
    }

    /// Check if a request from `ip` is within the general request rate.
    pub fn check_global(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.global_limiter
            .check_key(&ip)
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Check if a login attempt from `ip` is allowed.
    pub fn check_login(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.login_limiter
            .check_key(&ip)
            .map_err(|_| RateLimitError::LoginLimitExceeded)
    }

    /// Number of client IPs currently tracked by the login limiter.
    pub fn login_keys_count(&self) -> usize {
        self.login_limiter.len()
    }

    /// Number of client IPs currently tracked by the global limiter.
    pub fn global_keys_count(&self) -> usize {
        self.global_limiter.len()
    }

    /// Total keys held across both limiters.
    pub fn tracked_keys(&self) -> usize {
        self.login_keys_count() + self.global_keys_count()
    }

    /// Evict idle entries from both limiters.
    ///
    /// `retain_recent()` drops keys whose cells have fully recharged. Called
    /// periodically from the maintenance task.
    pub fn shrink(&self) {
        self.global_limiter.retain_recent();
        self.global_limiter.shrink_to_fit();
        self.login_limiter.retain_recent();
        self.login_limiter.shrink_to_fit();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many requests from one client IP.
    GlobalLimitExceeded,
    /// Too many login attempts from one client IP.
    LoginLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GlobalLimitExceeded => write!(f, "global rate limit exceeded"),
            Self::LoginLimitExceeded => write!(f, "login rate limit exceeded"),
        }
    }
}

impl std::error::Error for RateLimitError {}
