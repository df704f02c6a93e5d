//! Prometheus metrics endpoint.

use crate::server::AppState;
use crate::storage::{AccountStore, RecordStore};
use axum::extract::State;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Counters are monotonic since startup; gauges are read from the store on
/// each scrape.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let m = state.metrics();

    let logins = m.logins_total.load(Ordering::Relaxed);
    let login_failures = m.login_failures_total.load(Ordering::Relaxed);
    let syncs = m.syncs_total.load(Ordering::Relaxed);
    let sync_failures = m.sync_failures_total.load(Ordering::Relaxed);
    let applied = m.operations_applied_total.load(Ordering::Relaxed);
    let skipped = m.operations_skipped_total.load(Ordering::Relaxed);
    let auth_failures = m.auth_failures_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits_total.load(Ordering::Relaxed);
    let login_keys = state.rate_limits().login_keys_count();
    let global_keys = state.rate_limits().global_keys_count();

    // Store gauges (best effort)
    let accounts = state.storage().count_accounts().await.unwrap_or(0);
    let records = state.storage().count_records().await.unwrap_or(0);

    let body = format!(
        r#"# HELP otpsync_info Server information
# TYPE otpsync_info gauge
otpsync_info{{version="{version}"}} 1

# HELP otpsync_logins_total Successful logins
# TYPE otpsync_logins_total counter
otpsync_logins_total {logins}

# HELP otpsync_login_failures_total Logins rejected for bad credentials
# TYPE otpsync_login_failures_total counter
otpsync_login_failures_total {login_failures}

# HELP otpsync_syncs_total Sync batches committed
# TYPE otpsync_syncs_total counter
otpsync_syncs_total {syncs}

# HELP otpsync_sync_failures_total Sync batches rejected or rolled back
# TYPE otpsync_sync_failures_total counter
otpsync_sync_failures_total {sync_failures}

# HELP otpsync_operations_applied_total Record mutations committed
# TYPE otpsync_operations_applied_total counter
otpsync_operations_applied_total {applied}

# HELP otpsync_operations_skipped_total Operations skipped for a zero record id
# TYPE otpsync_operations_skipped_total counter
otpsync_operations_skipped_total {skipped}

# HELP otpsync_auth_failures_total Requests rejected by the token gate
# TYPE otpsync_auth_failures_total counter
otpsync_auth_failures_total {auth_failures}

# HELP otpsync_rate_limit_hits_total Requests rejected by a rate limiter
# TYPE otpsync_rate_limit_hits_total counter
otpsync_rate_limit_hits_total {rate_limits}

# HELP otpsync_login_limiter_keys Client IPs tracked by the login limiter
# TYPE otpsync_login_limiter_keys gauge
otpsync_login_limiter_keys {login_keys}

# HELP otpsync_request_limiter_keys Client IPs tracked by the request limiter
# TYPE otpsync_request_limiter_keys gauge
otpsync_request_limiter_keys {global_keys}

# HELP otpsync_accounts Accounts in the database
# TYPE otpsync_accounts gauge
otpsync_accounts {accounts}

# HELP otpsync_records Vault records in the database
# TYPE otpsync_records gauge
otpsync_records {records}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
