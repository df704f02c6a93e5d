//! Identity types for otpsync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// A unique identifier for an account.
///
/// UUID v4 format, rendered in hyphenated form on the wire and in storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(uuid::Uuid);

impl AccountId {
    /// Create a new random AccountId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for AccountId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| WireError::InvalidAccountId(s.to_string()))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

/// Identifier of a vault record, unique within its owning account.
///
/// Chosen by the client and otherwise opaque. The empty string and the nil
/// UUID are the "zero" identifier: operations carrying it are skipped.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a RecordId from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the zero identifier.
    pub fn is_zero(&self) -> bool {
        self.0.is_empty() || uuid::Uuid::parse_str(&self.0).is_ok_and(|u| u.is_nil())
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({:?})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_is_uuid_v4() {
        let id = AccountId::new();
        assert_eq!(id.0.get_version_num(), 4);
    }

    #[test]
    fn account_id_parses_display_form() {
        let original = AccountId::new();
        let parsed: AccountId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn account_id_rejects_garbage() {
        let err = "not-a-uuid".parse::<AccountId>().unwrap_err();
        assert!(matches!(err, WireError::InvalidAccountId(_)));
    }

    #[test]
    fn account_id_serializes_as_plain_string() {
        let id = AccountId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn empty_record_id_is_zero() {
        assert!(RecordId::default().is_zero());
        assert!(RecordId::new("").is_zero());
    }

    #[test]
    fn nil_uuid_record_id_is_zero() {
        assert!(RecordId::new("00000000-0000-0000-0000-000000000000").is_zero());
    }

    #[test]
    fn ordinary_record_ids_are_not_zero() {
        assert!(!RecordId::new("r1").is_zero());
        assert!(!RecordId::new(uuid::Uuid::new_v4().to_string()).is_zero());
        assert!(!RecordId::new(" ").is_zero());
    }

    #[test]
    fn record_ids_order_lexically() {
        let mut ids = vec![RecordId::from("b"), RecordId::from("a"), RecordId::from("c")];
        ids.sort();
        assert_eq!(ids, vec![RecordId::from("a"), RecordId::from("b"), RecordId::from("c")]);
    }
}
