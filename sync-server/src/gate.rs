//! Request gate: bearer token authentication and admin authorization.
//!
//! A request moves through [`GateState`]:
//!
//! ```text
//! Unauthenticated ──authenticate──► Authenticated(Principal) ──authorize_admin──► Authorized
//! ```
//!
//! Every failed transition is terminal. The axum middlewares
//! [`require_auth`] and [`require_admin`] drive the transitions and leave the
//! [`Principal`] in the request extensions for handlers.

use crate::error::{ApiError, AuthError, AuthzError};
use crate::server::AppState;
use crate::storage::AccountStore;
use crate::token::{Claims, TokenIssuer};
use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use sync_types::AccountId;

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Account the token belongs to.
    pub account_id: AccountId,
    /// Identity of that account.
    pub identity: String,
    /// Admin role.
    pub is_admin: bool,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            account_id: claims.account_id,
            identity: claims.identity,
            is_admin: claims.is_admin,
        }
    }
}

/// Where a request stands in the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// No credentials checked yet.
    Unauthenticated,
    /// A valid token was presented.
    Authenticated(Principal),
    /// The principal holds the admin role.
    Authorized(Principal),
}

impl GateState {
    /// Validate the bearer token in `headers`.
    ///
    /// With `accounts` set, the account behind the token must still exist
    /// and its identity must still produce the token's salt. The role is then
    /// taken from the stored account instead of the claims.
    pub async fn authenticate(
        self,
        headers: &HeaderMap,
        tokens: &TokenIssuer,
        accounts: Option<&dyn AccountStore>,
    ) -> Result<Self, ApiError> {
        match self {
            Self::Unauthenticated => {}
            already => return Ok(already),
        }

        let claims = tokens.validate(bearer_token(headers)?).map_err(AuthError::from)?;
        let principal = match accounts {
            Some(store) => current_principal(claims, tokens, store).await?,
            None => Principal::from(claims),
        };

        Ok(Self::Authenticated(principal))
    }

    /// Require the admin role.
    pub fn authorize_admin(self) -> Result<Self, AuthzError> {
        match self {
            Self::Authenticated(p) | Self::Authorized(p) if p.is_admin => Ok(Self::Authorized(p)),
            _ => Err(AuthzError::InsufficientRole),
        }
    }

    /// The principal, once authenticated.
    pub fn into_principal(self) -> Option<Principal> {
        match self {
            Self::Unauthenticated => None,
            Self::Authenticated(p) | Self::Authorized(p) => Some(p),
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingOrMalformedHeader)?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() && !token.contains(' ') => Ok(token),
        _ => Err(AuthError::MissingOrMalformedHeader),
    }
}

async fn current_principal(
    claims: Claims,
    tokens: &TokenIssuer,
    store: &dyn AccountStore,
) -> Result<Principal, ApiError> {
    let Some(account) = store.get_account(&claims.account_id).await? else {
        tracing::debug!("Token for missing account {}", claims.account_id);
        return Err(AuthError::InvalidSignatureOrExpired.into());
    };

    let salt = tokens
        .derive_salt(&account.identity)
        .map_err(AuthError::from)?;
    if salt != claims.salt {
        tracing::debug!("Stale token salt for account {}", account.id);
        return Err(AuthError::InvalidSignatureOrExpired.into());
    }

    Ok(Principal {
        account_id: account.id,
        identity: account.identity,
        is_admin: account.is_admin,
    })
}

/// Middleware: reject requests without a valid bearer token.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let accounts: Option<&dyn AccountStore> = state
        .config()
        .auth
        .verify_account_state
        .then_some(state.storage() as &dyn AccountStore);

    let (mut parts, body) = request.into_parts();
    let gate = match GateState::Unauthenticated
        .authenticate(&parts.headers, state.tokens(), accounts)
        .await
    {
        Ok(gate) => gate,
        Err(e) => {
            state
                .metrics()
                .auth_failures_total
                .fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
    };

    if let Some(principal) = gate.into_principal() {
        parts.extensions.insert(principal);
    }
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Middleware: reject authenticated requests lacking the admin role.
///
/// Must run after [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let gate = match request.extensions().get::<Principal>() {
        Some(p) => GateState::Authenticated(p.clone()),
        None => GateState::Unauthenticated,
    };
    gate.authorize_admin()?;
    Ok(next.run(request).await)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(ApiError::Auth(AuthError::MissingOrMalformedHeader))
    }
}
