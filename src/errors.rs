//! Typed error hierarchy for the conductor engine.
//!
//! Two top-level enums cover the two subsystems:
//! - `ExecutionError` — step execution and plan-level failures
//! - `StoreError` — plan store and persistence failures

use thiserror::Error;

/// Errors raised while executing a step or driving a plan.
///
/// Most variants are recoverable and handled inside the execution
/// controller (retry, forced completion, escalation) without surfacing
/// to the caller; see [`ExecutionError::is_recoverable`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Step {step_index} attempt {attempt} rejected by validator: {reason}")]
    ValidationRejected {
        step_index: usize,
        attempt: u32,
        reason: String,
    },

    #[error("Step {step_index} is looping: {pattern}")]
    LoopDetected { step_index: usize, pattern: String },

    #[error("Step {step_index} exceeded its boundary: {limit}")]
    BoundaryExceeded { step_index: usize, limit: String },

    #[error("Worker '{worker}' unavailable after {attempts} attempt(s): {reason}")]
    WorkerUnavailable {
        worker: String,
        attempts: u32,
        reason: String,
    },

    #[error(
        "Allocation for step {step_index} is ambiguous: best candidate '{candidate}' scored {confidence:.2}"
    )]
    AllocationAmbiguous {
        step_index: usize,
        candidate: String,
        confidence: f64,
    },

    #[error("Plan invalidated: {reason}")]
    PlanInvalidated { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExecutionError {
    /// Whether the controller handles this error locally (retry, forced
    /// completion, or escalation) instead of failing the plan.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExecutionError::ValidationRejected { .. }
                | ExecutionError::LoopDetected { .. }
                | ExecutionError::BoundaryExceeded { .. }
                | ExecutionError::WorkerUnavailable { .. }
                | ExecutionError::AllocationAmbiguous { .. }
        )
    }

    /// Whether this error asks for human confirmation rather than an
    /// automatic retry.
    pub fn needs_escalation(&self) -> bool {
        matches!(self, ExecutionError::AllocationAmbiguous { .. })
    }

    /// Whether a detected loop or an exceeded boundary triggered this error.
    /// Both are consumed as forced-completion triggers, not failures.
    pub fn is_forced_completion_trigger(&self) -> bool {
        matches!(
            self,
            ExecutionError::LoopDetected { .. } | ExecutionError::BoundaryExceeded { .. }
        )
    }
}

/// Errors from the plan store and its persistence backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Plan {plan_id} not found in storage")]
    PlanNotFound { plan_id: uuid::Uuid },

    #[error("Step index {index} out of range for plan with {len} steps")]
    StepOutOfRange { index: usize, len: usize },

    #[error("Stored plan fingerprint {stored} does not match recomputed {actual}")]
    FingerprintMismatch { stored: String, actual: String },

    #[error("Failed to read plan state at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write plan state at {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode plan state: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejected_is_matchable_and_recoverable() {
        let err = ExecutionError::ValidationRejected {
            step_index: 2,
            attempt: 1,
            reason: "generic deflection".to_string(),
        };
        match &err {
            ExecutionError::ValidationRejected { step_index, .. } => assert_eq!(*step_index, 2),
            _ => panic!("Expected ValidationRejected variant"),
        }
        assert!(err.is_recoverable());
        assert!(!err.needs_escalation());
    }

    #[test]
    fn loop_and_boundary_are_forced_completion_triggers() {
        let looped = ExecutionError::LoopDetected {
            step_index: 0,
            pattern: "navigate:example.com repeated".to_string(),
        };
        let bounded = ExecutionError::BoundaryExceeded {
            step_index: 0,
            limit: "max_actions (4)".to_string(),
        };
        assert!(looped.is_forced_completion_trigger());
        assert!(bounded.is_forced_completion_trigger());
        assert!(looped.is_recoverable());
        assert!(bounded.is_recoverable());
    }

    #[test]
    fn allocation_ambiguous_needs_escalation() {
        let err = ExecutionError::AllocationAmbiguous {
            step_index: 1,
            candidate: "coder".to_string(),
            confidence: 0.31,
        };
        assert!(err.needs_escalation());
        assert!(err.to_string().contains("coder"));
        assert!(err.to_string().contains("0.31"));
    }

    #[test]
    fn plan_invalidated_is_not_recoverable() {
        let err = ExecutionError::PlanInvalidated {
            reason: "remaining steps reference a deleted artifact".to_string(),
        };
        assert!(!err.is_recoverable());
        assert!(!err.is_forced_completion_trigger());
    }

    #[test]
    fn store_error_read_failed_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/work/.conductor/state/plan.json");
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = StoreError::ReadFailed {
            path: path.clone(),
            source: io_err,
        };
        match &err {
            StoreError::ReadFailed { path: p, source: s } => {
                assert_eq!(p, &path);
                assert_eq!(s.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected ReadFailed"),
        }
    }

    #[test]
    fn execution_error_converts_from_store_error() {
        let inner = StoreError::StepOutOfRange { index: 7, len: 3 };
        let err: ExecutionError = inner.into();
        match &err {
            ExecutionError::Store(StoreError::StepOutOfRange { index, len }) => {
                assert_eq!(*index, 7);
                assert_eq!(*len, 3);
            }
            _ => panic!("Expected ExecutionError::Store(StepOutOfRange)"),
        }
        assert!(!err.is_recoverable());
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let exec_err = ExecutionError::PlanInvalidated {
            reason: "x".into(),
        };
        assert_std_error(&exec_err);
        let store_err = StoreError::StepOutOfRange { index: 1, len: 0 };
        assert_std_error(&store_err);
    }
}
