//! HTTP surface for otpsync-server.
//!
//! ```text
//! POST   /api/v1/login      login rate limit
//! POST   /api/v1/sync       bearer token
//! GET    /admin/users       bearer token + admin
//! POST   /admin/users       bearer token + admin
//! DELETE /admin/users/:id   bearer token + admin
//! GET    /health
//! GET    /metrics
//! ```
//!
//! Every route sits behind the per-IP request limit, CORS, request tracing and
//! the body size limit.

mod admin;
mod auth;
mod extract;
pub mod health;
mod metrics;
mod sync;

use crate::error::ApiError;
use crate::gate::{require_admin, require_auth};
use crate::server::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub use extract::JsonBody;
pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config().server.max_body_bytes;

    let login = Router::new()
        .route("/api/v1/login", post(auth::login))
        .route_layer(middleware::from_fn_with_state(state.clone(), login_limit));

    let sync = Router::new()
        .route("/api/v1/sync", post(sync::sync))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Layers run bottom-up: require_auth, then require_admin.
    let admin = Router::new()
        .route("/admin/users", get(admin::list_users).post(admin::create_user))
        .route("/admin/users/:id", delete(admin::delete_user))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public = Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler));

    Router::new()
        .merge(login)
        .merge(sync)
        .merge(admin)
        .merge(public)
        .layer(middleware::from_fn_with_state(state.clone(), global_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Client address from the connection, or `0.0.0.0` when the router is
/// driven without connect info (tests).
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn global_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request);
    if let Err(e) = state.rate_limits().check_global(ip) {
        tracing::debug!("Global rate limit hit for {}", ip);
        state
            .metrics()
            .rate_limit_hits_total
            .fetch_add(1, Ordering::Relaxed);
        return Err(e.into());
    }
    Ok(next.run(request).await)
}

async fn login_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request);
    if let Err(e) = state.rate_limits().check_login(ip) {
        tracing::warn!("Login rate limit hit for {}", ip);
        state
            .metrics()
            .rate_limit_hits_total
            .fetch_add(1, Ordering::Relaxed);
        return Err(e.into());
    }
    Ok(next.run(request).await)
}
