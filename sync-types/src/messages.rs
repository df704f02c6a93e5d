//! Request and response bodies for the otpsync HTTP API.
//!
//! Record payloads are ciphertext produced by the client. Nothing in this
//! module (or the server) looks inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, RecordId};

/// Opaque encrypted record payload.
///
/// Carried as the exact string the client sent and returned unchanged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EncryptedData(String);

impl EncryptedData {
    /// Wrap client-provided ciphertext.
    pub fn new(data: impl Into<String>) -> Self {
        Self(data.into())
    }

    /// Borrow the payload.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for EncryptedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncryptedData({} bytes)", self.0.len())
    }
}

/// A record as it travels over the wire: identifier plus ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayload {
    /// Record identifier (a missing id decodes as the zero id)
    #[serde(default)]
    pub id: RecordId,
    /// Encrypted payload (a missing payload decodes as empty)
    #[serde(default)]
    pub encrypted_data: EncryptedData,
}

impl RecordPayload {
    /// Build a payload from an id and ciphertext.
    pub fn new(id: impl Into<RecordId>, encrypted_data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            encrypted_data: EncryptedData::new(encrypted_data),
        }
    }
}

/// Target of a delete: only the identifier is needed.
///
/// Any other fields the client sends alongside the id are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    /// Record identifier (a missing id decodes as the zero id)
    #[serde(default)]
    pub id: RecordId,
}

/// One entry of a sync batch.
///
/// Wire form: `{"op": "upsert", "data": {"id": .., "encrypted_data": ..}}`
/// or `{"op": "delete", "data": {"id": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "lowercase")]
pub enum SyncOperation {
    /// Insert the record or overwrite its payload
    Upsert(RecordPayload),
    /// Remove the record if present
    Delete(RecordRef),
}

impl SyncOperation {
    /// Shorthand for an upsert.
    pub fn upsert(id: impl Into<RecordId>, encrypted_data: impl Into<String>) -> Self {
        Self::Upsert(RecordPayload::new(id, encrypted_data))
    }

    /// Shorthand for a delete.
    pub fn delete(id: impl Into<RecordId>) -> Self {
        Self::Delete(RecordRef { id: id.into() })
    }

    /// The record this operation targets.
    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::Upsert(payload) => &payload.id,
            Self::Delete(target) => &target.id,
        }
    }
}

/// Credentials presented to `/login`.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Account identity (e.g. email address)
    pub identity: String,
    /// Plaintext password
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identity", &self.identity)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Successful login response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent requests
    pub token: String,
}

/// Admin request to create an account.
#[derive(Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    /// Account identity (must be unique)
    pub identity: String,
    /// Plaintext password, hashed before storage
    pub password: String,
    /// Grant admin role
    #[serde(default)]
    pub is_admin: bool,
}

impl std::fmt::Debug for CreateAccountRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateAccountRequest")
            .field("identity", &self.identity)
            .field("password", &"[REDACTED]")
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

/// Account as reported by the admin endpoints. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Account identifier
    pub id: AccountId,
    /// Account identity
    pub identity: String,
    /// Admin role flag
    pub is_admin: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Number of stored records (only filled by listings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Generic, client-safe message
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_decodes_from_wire_form() {
        let op: SyncOperation = serde_json::from_value(json!({
            "op": "upsert",
            "data": {"id": "r1", "encrypted_data": "abc"}
        }))
        .unwrap();

        assert_eq!(op, SyncOperation::upsert("r1", "abc"));
    }

    #[test]
    fn delete_ignores_payload_field() {
        let op: SyncOperation = serde_json::from_value(json!({
            "op": "delete",
            "data": {"id": "r1", "encrypted_data": "ignored"}
        }))
        .unwrap();

        assert_eq!(op, SyncOperation::delete("r1"));
    }

    #[test]
    fn missing_id_decodes_as_zero() {
        let op: SyncOperation = serde_json::from_value(json!({
            "op": "delete",
            "data": {}
        }))
        .unwrap();

        assert!(op.record_id().is_zero());
    }

    fn decode_batch(json: &str) -> serde_json::Result<Vec<SyncOperation>> {
        serde_json::from_str(json)
    }

    #[test]
    fn unknown_op_is_rejected() {
        let result = decode_batch(r#"[{"op": "merge", "data": {"id": "r1", "encrypted_data": "x"}}]"#);
        assert!(result.is_err());
    }

    #[test]
    fn upsert_with_empty_data_decodes_as_zero_id() {
        let batch = decode_batch(r#"[{"op": "upsert", "data": {}}]"#).unwrap();

        assert!(batch[0].record_id().is_zero());
        match &batch[0] {
            SyncOperation::Upsert(payload) => assert!(payload.encrypted_data.is_empty()),
            other => panic!("unexpected operation: {other:?}"),
        }
    }

    #[test]
    fn batch_preserves_submission_order() {
        let batch = decode_batch(
            r#"[
                {"op": "upsert", "data": {"id": "a", "encrypted_data": "1"}},
                {"op": "delete", "data": {"id": "a"}},
                {"op": "upsert", "data": {"id": "b", "encrypted_data": "2"}}
            ]"#,
        )
        .unwrap();

        let ids: Vec<_> = batch.iter().map(|op| op.record_id().as_str()).collect();
        assert_eq!(ids, vec!["a", "a", "b"]);
        assert!(matches!(batch[1], SyncOperation::Delete(_)));
    }

    #[test]
    fn record_payload_encodes_flat() {
        let value = serde_json::to_value(RecordPayload::new("r1", "abc")).unwrap();
        assert_eq!(value, json!({"id": "r1", "encrypted_data": "abc"}));
    }

    #[test]
    fn encrypted_data_debug_hides_ciphertext() {
        let data = EncryptedData::new("c2VjcmV0");
        let debug = format!("{:?}", data);
        assert!(!debug.contains("c2VjcmV0"));
        assert!(debug.contains("8 bytes"));
    }

    #[test]
    fn login_request_debug_redacts_password() {
        let req = LoginRequest {
            identity: "a@example.com".into(),
            password: "hunter2".into(),
        };
        let debug = format!("{:?}", req);
        assert!(debug.contains("a@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn create_account_defaults_to_non_admin() {
        let req: CreateAccountRequest =
            serde_json::from_value(json!({"identity": "u@example.com", "password": "pw"})).unwrap();
        assert!(!req.is_admin);
    }

    #[test]
    fn account_summary_omits_missing_record_count() {
        let summary = AccountSummary {
            id: AccountId::new(),
            identity: "u@example.com".into(),
            is_admin: false,
            created_at: Utc::now(),
            record_count: None,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value.get("record_count").is_none());
        assert!(value.get("password_hash").is_none());
    }
}
