//! Batch reconciliation.
//!
//! A client submits an ordered list of upserts and deletes. The batch is
//! planned (zero ids dropped, size limits checked), applied in one storage
//! transaction, and answered with the account's full record set.

use crate::config::StorageConfig;
use crate::error::{ApiError, SyncError, ValidationError};
use crate::storage::{RecordMutation, RecordStore};
use std::sync::Arc;
use sync_types::{AccountId, RecordPayload, SyncOperation};

/// Size limits applied while planning a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Largest accepted `encrypted_data`, in bytes.
    pub max_record_bytes: usize,
    /// Most operations accepted in one batch.
    pub max_batch_operations: usize,
}

impl From<&StorageConfig> for BatchLimits {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_record_bytes: config.max_record_bytes,
            max_batch_operations: config.max_batch_operations,
        }
    }
}

/// Mutations to run, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchPlan {
    /// Mutations with a non-zero id.
    pub mutations: Vec<RecordMutation>,
    /// Operations dropped for carrying a zero id.
    pub skipped: usize,
}

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// The account's full record set after commit, ordered by id.
    pub records: Vec<RecordPayload>,
    /// Mutations executed.
    pub applied: usize,
    /// Operations skipped for carrying a zero id.
    pub skipped: usize,
}

/// Why a batch was not applied.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Rejected during planning; storage was never touched.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The transaction failed and was rolled back.
    #[error(transparent)]
    Failed(#[from] SyncError),
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Invalid(e) => ApiError::Validation(e),
            BatchError::Failed(e) => ApiError::Sync(e),
        }
    }
}

/// Applies client batches against a [`RecordStore`].
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    limits: BatchLimits,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler over `store`.
    pub fn new(store: Arc<dyn RecordStore>, limits: BatchLimits) -> Self {
        Self { store, limits }
    }

    /// Validate a batch and turn it into storage mutations.
    pub fn plan(&self, operations: Vec<SyncOperation>) -> Result<BatchPlan, ValidationError> {
        if operations.len() > self.limits.max_batch_operations {
            return Err(ValidationError::BatchTooLarge {
                count: operations.len(),
                limit: self.limits.max_batch_operations,
            });
        }

        let mut plan = BatchPlan {
            mutations: Vec::with_capacity(operations.len()),
            skipped: 0,
        };

        for operation in operations {
            if operation.record_id().is_zero() {
                tracing::debug!("Skipping operation with zero record id");
                plan.skipped += 1;
                continue;
            }

            let mutation = match operation {
                SyncOperation::Upsert(payload) => {
                    if payload.encrypted_data.is_empty() {
                        return Err(ValidationError::EmptyField {
                            field: "encrypted_data",
                        });
                    }
                    let size = payload.encrypted_data.len();
                    if size > self.limits.max_record_bytes {
                        return Err(ValidationError::RecordTooLarge {
                            id: payload.id,
                            size,
                            limit: self.limits.max_record_bytes,
                        });
                    }
                    RecordMutation::Upsert {
                        id: payload.id,
                        encrypted_data: payload.encrypted_data,
                    }
                }
                SyncOperation::Delete(record) => RecordMutation::Delete { id: record.id },
            };
            plan.mutations.push(mutation);
        }

        Ok(plan)
    }

    /// Apply a batch for `account_id` and return the resulting record set.
    ///
    /// All mutations commit together or not at all. An empty batch is a
    /// plain read.
    pub async fn apply_batch(
        &self,
        account_id: &AccountId,
        operations: Vec<SyncOperation>,
    ) -> Result<SyncOutcome, BatchError> {
        let submitted = operations.len();
        let plan = self.plan(operations)?;

        let records = self
            .store
            .apply_mutations(account_id, &plan.mutations)
            .await
            .map_err(|source| SyncError::Storage {
                account_id: *account_id,
                source,
            })?;

        tracing::debug!(
            "Applied batch for {}: {} submitted, {} applied, {} skipped, {} records",
            account_id,
            submitted,
            plan.mutations.len(),
            plan.skipped,
            records.len()
        );

        Ok(SyncOutcome {
            records,
            applied: plan.mutations.len(),
            skipped: plan.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::{AccountStore, NewAccount, SqliteStorage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const LIMITS: BatchLimits = BatchLimits {
        max_record_bytes: 16,
        max_batch_operations: 4,
    };

    /// Store that records what it was asked to do and always fails.
    #[derive(Default)]
    struct FailingStore {
        seen: Mutex<Vec<RecordMutation>>,
    }

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn get_records(&self, _: &AccountId) -> Result<Vec<RecordPayload>, StorageError> {
            Ok(Vec::new())
        }

        async fn apply_mutations(
            &self,
            _: &AccountId,
            mutations: &[RecordMutation],
        ) -> Result<Vec<RecordPayload>, StorageError> {
            self.seen.lock().unwrap().extend_from_slice(mutations);
            Err(StorageError::Corrupt {
                reason: "disk on fire".into(),
            })
        }

        async fn count_records(&self) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    async fn sqlite_with_account() -> (Arc<SqliteStorage>, AccountId) {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let account = storage
            .create_account(NewAccount {
                identity: "alice@example.com".into(),
                password_hash: "h".into(),
                is_admin: false,
            })
            .await
            .unwrap();
        (storage, account.id)
    }

    fn reconciler(storage: Arc<SqliteStorage>) -> Reconciler {
        Reconciler::new(storage, LIMITS)
    }

    #[test]
    fn plan_skips_zero_ids() {
        let r = Reconciler::new(Arc::new(FailingStore::default()), LIMITS);
        let plan = r
            .plan(vec![
                SyncOperation::upsert("", "x"),
                SyncOperation::delete("00000000-0000-0000-0000-000000000000"),
                SyncOperation::upsert("r1", "x"),
            ])
            .unwrap();

        assert_eq!(plan.skipped, 2);
        assert_eq!(plan.mutations.len(), 1);
    }

    #[test]
    fn plan_rejects_upsert_without_payload() {
        let r = Reconciler::new(Arc::new(FailingStore::default()), LIMITS);
        let err = r.plan(vec![SyncOperation::upsert("r1", "")]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::EmptyField {
                field: "encrypted_data"
            }
        ));
    }

    #[tokio::test]
    async fn malformed_zero_id_upsert_does_not_sink_the_batch() {
        let (storage, account) = sqlite_with_account().await;
        let r = reconciler(storage);
        let batch: Vec<SyncOperation> = serde_json::from_str(
            r#"[
                {"op": "upsert", "data": {"id": "r1", "encrypted_data": "a"}},
                {"op": "upsert", "data": {}}
            ]"#,
        )
        .unwrap();

        let outcome = r.apply_batch(&account, batch).await.unwrap();
        assert_eq!(outcome.records, vec![RecordPayload::new("r1", "a")]);
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.skipped, 1);
    }

    #[test]
    fn plan_rejects_oversized_record() {
        let r = Reconciler::new(Arc::new(FailingStore::default()), LIMITS);
        let err = r
            .plan(vec![SyncOperation::upsert("big", "x".repeat(17))])
            .unwrap_err();
        assert!(matches!(err, ValidationError::RecordTooLarge { size: 17, .. }));
    }

    #[test]
    fn plan_accepts_record_at_limit() {
        let r = Reconciler::new(Arc::new(FailingStore::default()), LIMITS);
        assert!(r.plan(vec![SyncOperation::upsert("ok", "x".repeat(16))]).is_ok());
    }

    #[test]
    fn plan_rejects_oversized_batch() {
        let r = Reconciler::new(Arc::new(FailingStore::default()), LIMITS);
        let ops = (0..5).map(|i| SyncOperation::delete(i.to_string())).collect();
        assert!(matches!(
            r.plan(ops),
            Err(ValidationError::BatchTooLarge { count: 5, limit: 4 })
        ));
    }

    #[tokio::test]
    async fn invalid_batch_never_reaches_storage() {
        let store = Arc::new(FailingStore::default());
        let r = Reconciler::new(store.clone(), LIMITS);

        let result = r
            .apply_batch(
                &AccountId::new(),
                vec![
                    SyncOperation::upsert("a", "1"),
                    SyncOperation::upsert("b", "x".repeat(100)),
                ],
            )
            .await;

        assert!(matches!(result, Err(BatchError::Invalid(_))));
        assert!(store.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_becomes_sync_error() {
        let store = Arc::new(FailingStore::default());
        let r = Reconciler::new(store.clone(), LIMITS);
        let account = AccountId::new();

        let err = r
            .apply_batch(&account, vec![SyncOperation::upsert("a", "1")])
            .await
            .unwrap_err();

        match err {
            BatchError::Failed(SyncError::Storage { account_id, .. }) => {
                assert_eq!(account_id, account)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_returns_current_state() {
        let (storage, account) = sqlite_with_account().await;
        let r = reconciler(storage);

        r.apply_batch(&account, vec![SyncOperation::upsert("r1", "v1")])
            .await
            .unwrap();
        let outcome = r.apply_batch(&account, Vec::new()).await.unwrap();

        assert_eq!(outcome.records, vec![RecordPayload::new("r1", "v1")]);
        assert_eq!(outcome.applied, 0);
    }

    #[tokio::test]
    async fn repeated_batch_is_idempotent() {
        let (storage, account) = sqlite_with_account().await;
        let r = reconciler(storage);
        let batch = vec![SyncOperation::upsert("1", "P")];

        let first = r.apply_batch(&account, batch.clone()).await.unwrap();
        let second = r.apply_batch(&account, batch).await.unwrap();

        assert_eq!(first.records, second.records);
        assert_eq!(second.records, vec![RecordPayload::new("1", "P")]);
    }

    #[tokio::test]
    async fn last_write_in_batch_wins() {
        let (storage, account) = sqlite_with_account().await;
        let r = reconciler(storage);

        let outcome = r
            .apply_batch(
                &account,
                vec![SyncOperation::upsert("1", "P1"), SyncOperation::upsert("1", "P2")],
            )
            .await
            .unwrap();
        assert_eq!(outcome.records, vec![RecordPayload::new("1", "P2")]);

        let outcome = r
            .apply_batch(
                &account,
                vec![SyncOperation::upsert("2", "Q"), SyncOperation::delete("2")],
            )
            .await
            .unwrap();
        assert_eq!(outcome.records, vec![RecordPayload::new("1", "P2")]);
    }

    #[tokio::test]
    async fn deleting_missing_record_succeeds() {
        let (storage, account) = sqlite_with_account().await;
        let r = reconciler(storage);

        let outcome = r
            .apply_batch(&account, vec![SyncOperation::delete("999")])
            .await
            .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.applied, 1);
    }

    #[tokio::test]
    async fn zero_id_operations_leave_state_alone() {
        let (storage, account) = sqlite_with_account().await;
        let r = reconciler(storage);

        let outcome = r
            .apply_batch(
                &account,
                vec![SyncOperation::upsert("", "x"), SyncOperation::delete("")],
            )
            .await
            .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.applied, 0);
    }

    #[tokio::test]
    async fn failed_batch_persists_nothing() {
        let (storage, account) = sqlite_with_account().await;
        sqlx::query(
            "CREATE TRIGGER fail_on_boom BEFORE INSERT ON records \
             WHEN NEW.id = 'boom' BEGIN SELECT RAISE(ABORT, 'forced failure'); END",
        )
        .execute(storage.pool())
        .await
        .unwrap();
        let r = reconciler(storage.clone());

        let result = r
            .apply_batch(
                &account,
                vec![
                    SyncOperation::upsert("A", "1"),
                    SyncOperation::upsert("B", "2"),
                    SyncOperation::upsert("boom", "3"),
                ],
            )
            .await;

        assert!(matches!(result, Err(BatchError::Failed(_))));
        assert!(storage.get_records(&account).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn results_are_ordered_by_id() {
        let (storage, account) = sqlite_with_account().await;
        let r = reconciler(storage);

        let outcome = r
            .apply_batch(
                &account,
                vec![
                    SyncOperation::upsert("c", "3"),
                    SyncOperation::upsert("a", "1"),
                    SyncOperation::upsert("b", "2"),
                ],
            )
            .await
            .unwrap();
        let ids: Vec<_> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_batches_for_one_account_both_commit() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            SqliteStorage::new(&dir.path().join("otpsync.db"), 4)
                .await
                .unwrap(),
        );
        let account = storage
            .create_account(NewAccount {
                identity: "alice@example.com".into(),
                password_hash: "h".into(),
                is_admin: false,
            })
            .await
            .unwrap()
            .id;
        let r = Reconciler::new(
            storage.clone(),
            BatchLimits {
                max_record_bytes: 16,
                max_batch_operations: 100,
            },
        );

        let ids: Vec<String> = (0..50).map(|i| format!("r{i:02}")).collect();
        let batch = |value: &str| -> Vec<SyncOperation> {
            ids.iter()
                .map(|id| SyncOperation::upsert(id.as_str(), value))
                .collect()
        };
        let left = batch("L");
        let right = batch("R");

        let (a, b) = tokio::join!(
            r.apply_batch(&account, left),
            r.apply_batch(&account, right)
        );
        a.unwrap();
        b.unwrap();

        // Whole batches commit one after the other, never interleaved.
        let records = storage.get_records(&account).await.unwrap();
        assert_eq!(records.len(), ids.len());
        let winner = records[0].encrypted_data.clone();
        assert!(winner.as_str() == "L" || winner.as_str() == "R");
        assert!(records.iter().all(|record| record.encrypted_data == winner));
    }
}
