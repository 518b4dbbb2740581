//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while talking to the instance scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler refused the request for a reason that is safe to show
    /// to operators (quota exceeded, app stopped, ...).
    #[error("{0}")]
    Rejected(String),

    #[error("scheduler unavailable: {0}")]
    Unavailable(String),

    #[error("state store error: {0}")]
    State(#[from] capstan_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
