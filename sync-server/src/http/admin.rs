//! Account administration handlers. Mounted behind the admin gate.

use super::JsonBody;
use crate::error::{ApiError, ApiResult, ValidationError};
use crate::gate::Principal;
use crate::password;
use crate::server::AppState;
use crate::storage::{normalize_identity, AccountStore, NewAccount};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::str::FromStr;
use std::sync::Arc;
use sync_types::{AccountId, AccountSummary, CreateAccountRequest};

/// `GET /admin/users`: every account, newest first, with record counts.
pub async fn list_users(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<AccountSummary>>> {
    let accounts = state.storage().list_accounts().await?;
    Ok(Json(
        accounts
            .iter()
            .map(|(account, count)| account.summary(Some(*count)))
            .collect(),
    ))
}

/// `POST /admin/users`: create an account.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    admin: Principal,
    JsonBody(req): JsonBody<CreateAccountRequest>,
) -> ApiResult<(StatusCode, Json<AccountSummary>)> {
    let identity = normalize_identity(&req.identity);
    if identity.is_empty() {
        return Err(ValidationError::EmptyField { field: "identity" }.into());
    }
    if req.password.is_empty() {
        return Err(ValidationError::EmptyField { field: "password" }.into());
    }
    let identity = identity.to_string();

    let password_hash = password::hash_password_async(req.password)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let account = state
        .storage()
        .create_account(NewAccount {
            identity,
            password_hash,
            is_admin: req.is_admin,
        })
        .await?;

    tracing::info!(
        "{} created account {} ({}, admin: {})",
        admin.identity,
        account.identity,
        account.id,
        account.is_admin
    );

    Ok((StatusCode::CREATED, Json(account.summary(None))))
}

/// `DELETE /admin/users/:id`: delete an account and its records.
///
/// Deleting an id that does not exist is not an error.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    admin: Principal,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = AccountId::from_str(&id).map_err(|_| ValidationError::InvalidAccountId(id))?;

    if state.storage().delete_account(&id).await? {
        tracing::info!("{} deleted account {}", admin.identity, id);
    } else {
        tracing::debug!("{} deleted absent account {}", admin.identity, id);
    }

    Ok(StatusCode::NO_CONTENT)
}
