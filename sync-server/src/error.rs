//! Error types for otpsync-server.
//!
//! Handler-facing errors are collected in [`ApiError`], which maps each
//! failure class to an HTTP status and a generic message. Details only go to
//! the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use sync_types::{AccountId, ErrorBody, RecordId};

/// Startup errors for otpsync-server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Password hashing failed while bootstrapping the admin account.
    #[error("password error: {0}")]
    Password(#[from] crate::password::PasswordError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An account with this identity already exists.
    #[error("duplicate identity: {identity}")]
    DuplicateIdentity {
        /// The identity that collided.
        identity: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row: {reason}")]
    Corrupt {
        /// What failed to decode.
        reason: String,
    },

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Authentication failures. All surface as 401 with a generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header, or not of the form `Bearer <token>`.
    #[error("missing or malformed authorization header")]
    MissingOrMalformedHeader,

    /// Token failed signature, shape, expiry or account checks.
    #[error("invalid signature or expired token")]
    InvalidSignatureOrExpired,

    /// Token declares a signing algorithm other than HS256.
    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,

    /// Login with unknown identity or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Authorization failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    /// Authenticated, but the account lacks the admin role.
    #[error("insufficient role")]
    InsufficientRole,
}

/// Malformed or unacceptable request input.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Body could not be decoded.
    #[error("invalid request body: {0}")]
    Body(String),

    /// A required field was empty.
    #[error("field must not be empty: {field}")]
    EmptyField {
        /// Field name.
        field: &'static str,
    },

    /// Path parameter is not an account id.
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),

    /// An upsert payload exceeds the configured record size.
    #[error("record {id} too large: {size} bytes (limit: {limit} bytes)")]
    RecordTooLarge {
        /// The offending record.
        id: RecordId,
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// The batch has more operations than allowed.
    #[error("batch too large: {count} operations (limit: {limit})")]
    BatchTooLarge {
        /// Number of submitted operations.
        count: usize,
        /// Maximum allowed.
        limit: usize,
    },
}

/// Batch application failed; nothing from the batch was persisted.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The transaction failed and was rolled back.
    #[error("sync batch for account {account_id} rolled back: {source}")]
    Storage {
        /// Account the batch belonged to.
        account_id: AccountId,
        /// Underlying storage failure.
        #[source]
        source: StorageError,
    },
}

/// Every error a handler or middleware can return.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// 403.
    #[error(transparent)]
    Authz(#[from] AuthzError),

    /// 400.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// 500, batch rolled back.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// 500 (409 for duplicate identities).
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// 429.
    #[error("rate limit exceeded: {0}")]
    RateLimited(#[from] crate::limits::RateLimitError),

    /// 413.
    #[error("payload too large")]
    PayloadTooLarge,

    /// 500 for anything else (hashing failures, task panics).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status and client-facing message for this error.
    pub fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Auth(AuthError::InvalidCredentials) => {
                (StatusCode::UNAUTHORIZED, "invalid credentials")
            }
            Self::Auth(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Authz(_) => (StatusCode::FORBIDDEN, "admin access required"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "invalid request"),
            Self::Sync(_) => (StatusCode::INTERNAL_SERVER_ERROR, "sync failed"),
            Self::Storage(StorageError::DuplicateIdentity { .. }) => {
                (StatusCode::CONFLICT, "account already exists")
            }
            Self::Storage(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
            Self::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate limited"),
            Self::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "payload too large"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }

        let body = ErrorBody {
            error: message.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// Result type alias for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
