//! Argon2id password hashing.
//!
//! Hashes are stored as PHC strings. Hashing is CPU-bound, so the async
//! wrappers move it onto the blocking pool.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use std::sync::OnceLock;
use zeroize::Zeroizing;

/// Password hashing errors.
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Argon2 rejected the input or parameters.
    #[error("password hashing failed: {0}")]
    Hash(String),

    /// The blocking task was cancelled or panicked.
    #[error("password task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Check a password against a stored PHC string.
///
/// An unparseable hash counts as a mismatch.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hash on the blocking pool.
pub async fn hash_password_async(password: String) -> Result<String, PasswordError> {
    let password = Zeroizing::new(password);
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

/// Verify on the blocking pool.
///
/// With `password_hash` of `None` (unknown identity) a fixed dummy hash is
/// checked instead, so the response time does not reveal whether the
/// identity exists. The result is then always `false`.
pub async fn verify_password_async(
    password: String,
    password_hash: Option<String>,
) -> Result<bool, PasswordError> {
    let password = Zeroizing::new(password);
    tokio::task::spawn_blocking(move || match password_hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            if let Some(dummy) = dummy_hash() {
                let _ = verify_password(&password, dummy);
            }
            false
        }
    })
    .await
    .map_err(PasswordError::from)
}

fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("otpsync-dummy-password").ok())
        .as_deref()
}
