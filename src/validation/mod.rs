//! Completion validation for Conductor.
//!
//! Decides whether a worker's response really finished its step. The
//! rule-based validator rejects deflections, short responses, and
//! off-topic content outright, then walks a signal cascade from the
//! explicit `<step-complete/>` marker down to attempt-adapted acceptance
//! of weak evidence. Approvals carry a completion kind (clean, with
//! errors, via fallback) and a confidence; a quality score is computed
//! separately once the step is recorded.
//!
//! Loop detection runs before any of this: a looping response must never
//! reach content validation.

mod quality;
mod signals;
mod validator;

pub use quality::score_quality;
pub use signals::{
    ReplanRequest, category_signals, has_behavior_signal, has_step_marker, has_task_marker,
    is_deflection, parse_replan_request, scan_completion_kind,
};
pub use validator::{CompletionPolicy, CompletionValidator, ValidationConfig, ValidationOutcome};
