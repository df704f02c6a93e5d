//! Storage layer for otpsync-server.
//!
//! Accounts and their vault records. The record side exposes a single
//! atomic write primitive, [`RecordStore::apply_mutations`], which the
//! reconciliation engine drives.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sync_types::{AccountId, AccountSummary, EncryptedData, RecordId, RecordPayload};

/// Canonical form of an identity: surrounding whitespace removed.
///
/// Applied wherever an identity enters the system (account creation, admin
/// bootstrap, login) so lookups match what was stored.
pub fn normalize_identity(identity: &str) -> &str {
    identity.trim()
}

/// A stored account.
#[derive(Clone)]
pub struct Account {
    /// Account identifier.
    pub id: AccountId,
    /// Unique identity string (e.g. an email address).
    pub identity: String,
    /// Argon2 PHC hash of the password.
    pub password_hash: String,
    /// Admin role flag.
    pub is_admin: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Public view of this account.
    pub fn summary(&self, record_count: Option<u64>) -> AccountSummary {
        AccountSummary {
            id: self.id,
            identity: self.identity.clone(),
            is_admin: self.is_admin,
            created_at: self.created_at,
            record_count,
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("password_hash", &"[REDACTED]")
            .field("is_admin", &self.is_admin)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Request to create a new account.
#[derive(Clone)]
pub struct NewAccount {
    /// Unique identity string.
    pub identity: String,
    /// Already-hashed password.
    pub password_hash: String,
    /// Admin role flag.
    pub is_admin: bool,
}

/// One step of a planned batch, already stripped of zero ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordMutation {
    /// Insert or overwrite the payload of `(id, account)`.
    Upsert {
        /// Record identifier.
        id: RecordId,
        /// New payload.
        encrypted_data: EncryptedData,
    },
    /// Remove `(id, account)` if present.
    Delete {
        /// Record identifier.
        id: RecordId,
    },
}

/// Trait for account storage backends.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Create an account.
    ///
    /// Fails with [`StorageError::DuplicateIdentity`] if the identity is taken.
    async fn create_account(&self, new: NewAccount) -> Result<Account, StorageError>;

    /// Look up an account by identity.
    async fn get_account_by_identity(&self, identity: &str)
        -> Result<Option<Account>, StorageError>;

    /// Look up an account by id.
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, StorageError>;

    /// All accounts, newest first, with their record counts.
    async fn list_accounts(&self) -> Result<Vec<(Account, u64)>, StorageError>;

    /// Delete an account and, by cascade, its records.
    ///
    /// Returns whether an account was removed.
    async fn delete_account(&self, id: &AccountId) -> Result<bool, StorageError>;

    /// Create an admin account unless the identity already exists.
    ///
    /// Returns `true` if an account was created.
    async fn ensure_admin(&self, identity: &str, password_hash: &str)
        -> Result<bool, StorageError>;

    /// Total number of accounts.
    async fn count_accounts(&self) -> Result<u64, StorageError>;
}

/// Trait for vault record storage backends.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Full record set for an account, ordered by record id.
    async fn get_records(&self, account_id: &AccountId) -> Result<Vec<RecordPayload>, StorageError>;

    /// Apply mutations in order inside one transaction, then return the
    /// account's full record set.
    ///
    /// Either every mutation is committed or none is.
    async fn apply_mutations(
        &self,
        account_id: &AccountId,
        mutations: &[RecordMutation],
    ) -> Result<Vec<RecordPayload>, StorageError>;

    /// Total number of records across all accounts.
    async fn count_records(&self) -> Result<u64, StorageError>;
}
