//! Login handler.

use super::JsonBody;
use crate::error::{ApiError, ApiResult, AuthError, ValidationError};
use crate::password;
use crate::server::AppState;
use crate::storage::{normalize_identity, AccountStore};
use axum::extract::State;
use axum::Json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use sync_types::{LoginRequest, LoginResponse};

/// `POST /api/v1/login`: exchange identity and password for a bearer token.
///
/// Unknown identities and wrong passwords get the same answer after the same
/// amount of hashing work.
pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let identity = normalize_identity(&req.identity);
    if identity.is_empty() {
        return Err(ValidationError::EmptyField { field: "identity" }.into());
    }
    if req.password.is_empty() {
        return Err(ValidationError::EmptyField { field: "password" }.into());
    }

    let account = state.storage().get_account_by_identity(identity).await?;
    let verified = password::verify_password_async(
        req.password,
        account.as_ref().map(|a| a.password_hash.clone()),
    )
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let account = match account {
        Some(account) if verified => account,
        _ => {
            state
                .metrics()
                .login_failures_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::info!("Failed login for {}", identity);
            return Err(AuthError::InvalidCredentials.into());
        }
    };

    let token = state
        .tokens()
        .issue(&account)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state.metrics().logins_total.fetch_add(1, Ordering::Relaxed);
    tracing::info!("Login for {} ({})", account.identity, account.id);

    Ok(Json(LoginResponse { token }))
}
