//! Error types for the simq state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error(transparent)]
    InvalidKey(#[from] simq_core::InvalidKey),

    /// A chunked bulk write stopped partway. Chunks before the failing one
    /// are committed; the failing chunk and everything after it are not.
    #[error(
        "bulk write failed after {chunks_committed} chunk(s): {persisted} of {total} entries persisted: {source}"
    )]
    PartialBatch {
        persisted: usize,
        chunks_committed: usize,
        total: usize,
        #[source]
        source: Box<StateError>,
    },
}

impl StateError {
    /// Whether the caller may retry the operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StateError::Open(_)
                | StateError::Transaction(_)
                | StateError::Table(_)
                | StateError::Read(_)
                | StateError::Write(_)
                | StateError::PartialBatch { .. }
        )
    }

    /// Whether the error was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StateError::UnknownCollection(_) | StateError::InvalidKey(_) | StateError::NotFound(_)
        )
    }
}
