//! Rollout error taxonomy.
//!
//! Every failure a tick can hit is a [`RolloutError`]. Domain errors (and
//! scheduler rejections) carry messages that are safe to store on the
//! deployment and show to users; everything else is replaced by
//! [`UNEXPECTED_ERROR_MESSAGE`] before it is persisted.

use capstan_scheduler::SchedulerError;
use capstan_state::{DeploymentPhase, StateError};
use thiserror::Error;

/// Message stored on a deployment for failures that must not leak internals.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error has occurred.";

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Inconsistent input state detected by an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Cannot {action} deployment in state {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: DeploymentPhase,
    },

    #[error("Canary instance target {cap} exceeds target instance count {target}")]
    CapExceedsTarget { cap: u32, target: u32 },

    #[error("Deployment has no canary configured")]
    CanaryNotConfigured,

    #[error("Cannot finalize deployment with {live} of {target} instances deployed")]
    NotConverged { live: u32, target: u32 },
}

/// Any failure raised while running a tick.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("deployment not found: {0}")]
    NotFound(String),
}

/// How a failure is reported back on the deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Message is persisted verbatim.
    Domain,
    /// Message is replaced by [`UNEXPECTED_ERROR_MESSAGE`].
    Internal,
}

impl RolloutError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            RolloutError::Domain(_) | RolloutError::Scheduler(SchedulerError::Rejected(_)) => {
                ErrorClass::Domain
            }
            _ => ErrorClass::Internal,
        }
    }

    /// Text to store in the deployment's error field.
    pub fn persisted_message(&self) -> String {
        match self.classify() {
            ErrorClass::Domain => self.to_string(),
            ErrorClass::Internal => UNEXPECTED_ERROR_MESSAGE.to_string(),
        }
    }

    /// A command that was refused outright because of the deployment's phase.
    pub fn is_refusal(&self) -> bool {
        matches!(self, RolloutError::Domain(DomainError::InvalidPhase { .. }))
    }

    /// Short error name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RolloutError::Domain(DomainError::InvalidPhase { .. }) => "InvalidPhase",
            RolloutError::Domain(DomainError::CapExceedsTarget { .. }) => "CapExceedsTarget",
            RolloutError::Domain(DomainError::CanaryNotConfigured) => "CanaryNotConfigured",
            RolloutError::Domain(DomainError::NotConverged { .. }) => "NotConverged",
            RolloutError::Scheduler(SchedulerError::Rejected(_)) => "SchedulerRejected",
            RolloutError::Scheduler(SchedulerError::Unavailable(_)) => "SchedulerUnavailable",
            RolloutError::Scheduler(SchedulerError::State(_)) => "SchedulerState",
            RolloutError::State(StateError::Conflict { .. }) => "RevisionConflict",
            RolloutError::State(_) => "StateStore",
            RolloutError::NotFound(_) => "NotFound",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_message() {
        let err = RolloutError::from(DomainError::InvalidPhase {
            action: "canary",
            phase: DeploymentPhase::Canceled,
        });
        assert_eq!(err.classify(), ErrorClass::Domain);
        assert_eq!(
            err.persisted_message(),
            "Cannot canary deployment in state CANCELED"
        );
        assert!(err.is_refusal());
    }

    #[test]
    fn scheduler_rejection_is_approved() {
        let err = RolloutError::from(SchedulerError::Rejected(
            "memory quota exceeded for org".to_string(),
        ));
        assert_eq!(err.classify(), ErrorClass::Domain);
        assert_eq!(err.persisted_message(), "memory quota exceeded for org");
        assert!(!err.is_refusal());
    }

    #[test]
    fn internal_errors_are_masked() {
        let err = RolloutError::from(SchedulerError::Unavailable(
            "dial tcp 10.0.4.7:8889: connection refused".to_string(),
        ));
        assert_eq!(err.classify(), ErrorClass::Internal);
        assert_eq!(err.persisted_message(), UNEXPECTED_ERROR_MESSAGE);
        assert!(err.to_string().contains("connection refused"));

        let err = RolloutError::from(StateError::Conflict {
            id: "dep-1".to_string(),
            expected: 3,
            found: 4,
        });
        assert_eq!(err.classify(), ErrorClass::Internal);
        assert_eq!(err.kind(), "RevisionConflict");
    }
}
