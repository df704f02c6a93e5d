//! Sync handler.

use super::JsonBody;
use crate::error::{ApiError, ApiResult};
use crate::gate::Principal;
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use sync_types::{RecordPayload, SyncOperation};

/// `POST /api/v1/sync`: apply a batch and return the caller's full record set.
pub async fn sync(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    JsonBody(operations): JsonBody<Vec<SyncOperation>>,
) -> ApiResult<Json<Vec<RecordPayload>>> {
    let m = state.metrics();

    match state
        .reconciler()
        .apply_batch(&principal.account_id, operations)
        .await
    {
        Ok(outcome) => {
            m.syncs_total.fetch_add(1, Ordering::Relaxed);
            m.operations_applied_total
                .fetch_add(outcome.applied as u64, Ordering::Relaxed);
            m.operations_skipped_total
                .fetch_add(outcome.skipped as u64, Ordering::Relaxed);
            Ok(Json(outcome.records))
        }
        Err(e) => {
            m.sync_failures_total.fetch_add(1, Ordering::Relaxed);
            Err(ApiError::from(e))
        }
    }
}
