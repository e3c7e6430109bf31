//! Error types for the replscale store.

use thiserror::Error;

/// Result type alias for store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the redb-backed store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open store: {0}")]
    Open(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("table unavailable: {0}")]
    Table(String),

    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("failed to decode record: {0}")]
    Decode(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },
}
