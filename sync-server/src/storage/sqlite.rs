//! SQLite storage backend for otpsync-server.

use super::{Account, AccountStore, NewAccount, RecordMutation, RecordStore};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use sync_types::{AccountId, EncryptedData, RecordId, RecordPayload};

const UPSERT_RECORD: &str = r#"
    INSERT INTO records (id, account_id, encrypted_data)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(id, account_id) DO UPDATE SET encrypted_data = excluded.encrypted_data
"#;

const DELETE_RECORD: &str = "DELETE FROM records WHERE id = ?1 AND account_id = ?2";

const SELECT_RECORDS: &str =
    "SELECT id, encrypted_data FROM records WHERE account_id = ?1 ORDER BY id ASC";

const SELECT_ACCOUNT: &str =
    "SELECT id, identity, password_hash, is_admin, created_at FROM accounts";

/// SQLite-based account and record storage.
///
/// Uses WAL mode for concurrent reads/writes. Foreign keys are enforced so
/// deleting an account removes its records.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at `path`.
    pub async fn new(path: &Path, max_connections: u32) -> Result<Self, StorageError> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        tracing::info!("Opened database at {}", path.display());
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .foreign_keys(true);

        // One connection that never recycles, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                identity TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT NOT NULL,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                encrypted_data TEXT NOT NULL,
                PRIMARY KEY (id, account_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_account ON records(account_id)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }

    /// Check that the database answers.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn records_in(
        tx: &mut Transaction<'_, Sqlite>,
        account_id: &AccountId,
    ) -> Result<Vec<RecordPayload>, StorageError> {
        let rows = sqlx::query_as::<_, RecordRow>(SELECT_RECORDS)
            .bind(account_id.to_string())
            .fetch_all(&mut **tx)
            .await
            .map_err(StorageError::Database)?;

        Ok(rows.into_iter().map(RecordPayload::from).collect())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[async_trait]
impl AccountStore for SqliteStorage {
    async fn create_account(&self, new: NewAccount) -> Result<Account, StorageError> {
        let account = Account {
            id: AccountId::new(),
            identity: new.identity,
            password_hash: new.password_hash,
            is_admin: new.is_admin,
            created_at: Utc::now(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, identity, password_hash, is_admin, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.identity)
        .bind(&account.password_hash)
        .bind(account.is_admin)
        .bind(account.created_at.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(account),
            Err(e) if is_unique_violation(&e) => Err(StorageError::DuplicateIdentity {
                identity: account.identity,
            }),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    async fn get_account_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!("{} WHERE identity = ?1", SELECT_ACCOUNT))
            .bind(identity)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        row.map(Account::try_from).transpose()
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!("{} WHERE id = ?1", SELECT_ACCOUNT))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        row.map(Account::try_from).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<(Account, u64)>, StorageError> {
        let rows = sqlx::query_as::<_, AccountListRow>(
            r#"
            SELECT a.id, a.identity, a.password_hash, a.is_admin, a.created_at,
                   COUNT(r.id) AS record_count
            FROM accounts a
            LEFT JOIN records r ON r.account_id = a.id
            GROUP BY a.id
            ORDER BY a.created_at DESC, a.rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter()
            .map(|row| {
                let count = row.record_count.max(0) as u64;
                Ok((Account::try_from(row.account)?, count))
            })
            .collect()
    }

    async fn delete_account(&self, id: &AccountId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn ensure_admin(&self, identity: &str, password_hash: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, identity, password_hash, is_admin, created_at)
            VALUES (?1, ?2, ?3, 1, ?4)
            ON CONFLICT(identity) DO NOTHING
            "#,
        )
        .bind(AccountId::new().to_string())
        .bind(identity)
        .bind(password_hash)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_accounts(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }
}

#[async_trait]
impl RecordStore for SqliteStorage {
    async fn get_records(&self, account_id: &AccountId) -> Result<Vec<RecordPayload>, StorageError> {
        let rows = sqlx::query_as::<_, RecordRow>(SELECT_RECORDS)
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(rows.into_iter().map(RecordPayload::from).collect())
    }

    async fn apply_mutations(
        &self,
        account_id: &AccountId,
        mutations: &[RecordMutation],
    ) -> Result<Vec<RecordPayload>, StorageError> {
        let account = account_id.to_string();

        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        for mutation in mutations {
            match mutation {
                RecordMutation::Upsert { id, encrypted_data } => {
                    sqlx::query(UPSERT_RECORD)
                        .bind(id.as_str())
                        .bind(&account)
                        .bind(encrypted_data.as_str())
                        .execute(&mut *tx)
                        .await
                        .map_err(StorageError::Database)?;
                }
                RecordMutation::Delete { id } => {
                    sqlx::query(DELETE_RECORD)
                        .bind(id.as_str())
                        .bind(&account)
                        .execute(&mut *tx)
                        .await
                        .map_err(StorageError::Database)?;
                }
            }
        }

        let records = Self::records_in(&mut tx, account_id).await?;
        tx.commit().await.map_err(StorageError::Database)?;

        Ok(records)
    }

    async fn count_records(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }
}

/// Internal row types for SQLite queries.
#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    identity: String,
    password_hash: String,
    is_admin: bool,
    created_at: i64,
}

#[derive(sqlx::FromRow)]
struct AccountListRow {
    #[sqlx(flatten)]
    account: AccountRow,
    record_count: i64,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: String,
    encrypted_data: String,
}

impl TryFrom<AccountRow> for Account {
    type Error = StorageError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId::from_str(&row.id).map_err(|_| StorageError::Corrupt {
                reason: format!("invalid account id {:?}", row.id),
            })?,
            identity: row.identity,
            password_hash: row.password_hash,
            is_admin: row.is_admin,
            created_at: DateTime::<Utc>::from_timestamp_millis(row.created_at).ok_or_else(
                || StorageError::Corrupt {
                    reason: format!("invalid created_at {}", row.created_at),
                },
            )?,
        })
    }
}

impl From<RecordRow> for RecordPayload {
    fn from(row: RecordRow) -> Self {
        RecordPayload {
            id: RecordId::new(row.id),
            encrypted_data: EncryptedData::new(row.encrypted_data),
        }
    }
}
