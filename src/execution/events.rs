//! Events emitted during plan execution.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::loops::ActionRecord;
use crate::plan::CompletionKind;

/// Events emitted while a plan runs. Consumers (progress UI, journal)
/// subscribe through an mpsc channel; emission is fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Plan execution has started.
    PlanStarted {
        plan_id: Uuid,
        task: String,
        steps: usize,
    },
    /// A step attempt was dispatched to a worker.
    StepStarted {
        step_index: usize,
        title: String,
        worker: String,
        attempt: u32,
    },
    /// A worker reported a discrete action.
    WorkerAction {
        step_index: usize,
        action: ActionRecord,
    },
    /// A step attempt was rejected and will be retried.
    StepRetrying {
        step_index: usize,
        attempt: u32,
        reason: String,
    },
    /// A step reached `completed`.
    StepCompleted {
        step_index: usize,
        kind: CompletionKind,
        quality: f64,
        evidence: String,
    },
    /// A step exhausted its attempts.
    StepFailed {
        step_index: usize,
        attempts: u32,
        reason: String,
    },
    /// A step was skipped by human decision.
    StepSkipped {
        step_index: usize,
        reason: String,
    },
    /// Loop detection fired on the current attempt.
    LoopDetected {
        step_index: usize,
        pattern: String,
    },
    /// A boundary limit was hit during dispatch.
    BoundaryBreached {
        step_index: usize,
        limit: String,
    },
    /// Human input was requested.
    EscalationRaised {
        step_index: usize,
        reason: String,
    },
    /// The remaining plan was replaced after a plan-invalid signal.
    ReplanApplied {
        from_index: usize,
        reason: String,
        new_len: usize,
    },
    /// Plan execution finished.
    PlanCompleted {
        plan_id: Uuid,
        completed: usize,
        failed: usize,
        skipped: usize,
        success: bool,
    },
}
