//! Background maintenance task.
//!
//! Periodically evicts idle client IPs from the rate limiters so their
//! maps do not grow without bound.

use crate::config::CleanupConfig;
use crate::limits::RateLimits;
use std::time::Duration;
use tokio::time::interval;

/// Spawn the maintenance task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_maintenance_task(
    rate_limits: RateLimits,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Maintenance task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Maintenance task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));
        // First tick completes immediately.
        timer.tick().await;

        loop {
            timer.tick().await;
            run_once(&rate_limits);
        }
    })
}

fn run_once(rate_limits: &RateLimits) {
    let before = rate_limits.tracked_keys();
    rate_limits.shrink();
    let after = rate_limits.tracked_keys();

    let evicted = before.saturating_sub(after);
    if evicted > 0 {
        tracing::info!("Maintenance: evicted {} idle rate limiter keys", evicted);
    } else {
        tracing::debug!("Maintenance: {} rate limiter keys tracked", after);
    }
}
