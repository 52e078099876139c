//! Scheduler error types.

use thiserror::Error;

use simq_state::StateError;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl SchedulerError {
    /// Whether the error was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        match self {
            SchedulerError::Validation(_) => true,
            SchedulerError::State(e) => e.is_client_error(),
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Validation(_) => false,
            SchedulerError::State(e) => e.is_retryable(),
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
