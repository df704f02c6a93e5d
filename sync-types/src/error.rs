//! Error types for otpsync wire types.

use thiserror::Error;

/// Errors that can occur while parsing otpsync identifiers.
#[derive(Debug, Error)]
pub enum WireError {
    /// Account identifier is not a UUID
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::InvalidAccountId("nope".into());
        assert_eq!(err.to_string(), "invalid account id: nope");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
