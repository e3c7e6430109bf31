//! Orchestrator error types.

use thiserror::Error;

use replscale_core::CoreError;
use replscale_state::StateError;

/// Errors that end an invocation without reaching a terminal state.
///
/// None of these corrupt an in-flight operation: a failed poll tick is
/// simply retried by the next wake.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    #[error("replication instance not found: {0}")]
    InstanceNotFound(String),

    #[error("infrastructure unavailable: {0}")]
    InfraUnavailable(String),

    #[error("wake scheduler error: {0}")]
    Schedule(String),

    #[error("operation marker error: {0}")]
    Lock(String),

    #[error("state store error: {0}")]
    Store(#[from] StateError),

    #[error("malformed operation payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ScaleError {
    /// Whether an operator needs to fix something before retrying.
    pub fn is_config(&self) -> bool {
        matches!(self, ScaleError::Config(_))
    }
}

pub type ScaleResult<T> = Result<T, ScaleError>;

/// Notification delivery failure. Logged and dropped, never propagated.
#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);
