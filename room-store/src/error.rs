//! Error types for room-store.

use room_types::RoomId;

/// Main error type for room store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transient backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The room has no metadata.
    #[error("room does not exist: {room_id}")]
    RoomNotFound {
        /// The missing room.
        room_id: RoomId,
    },

    /// The room is at capacity and the caller is not a participant.
    #[error("room is full: {room_id} (capacity: {capacity})")]
    RoomFull {
        /// The full room.
        room_id: RoomId,
        /// Its capacity.
        capacity: u32,
    },

    /// An id cannot be used as a store path segment.
    #[error("invalid key: {key:?}")]
    InvalidKey {
        /// The offending key.
        key: String,
    },

    /// An argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Database(_))
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
