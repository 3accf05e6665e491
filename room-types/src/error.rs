//! Error types for cardroom wire encoding.

use thiserror::Error;

/// Errors raised while encoding or decoding cardroom messages and records.
#[derive(Debug, Error)]
pub enum TypesError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// JSON record could not be converted
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }

    #[test]
    fn invalid_record_display() {
        let err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = TypesError::from(err);
        assert!(err.to_string().starts_with("invalid record:"));
    }
}
