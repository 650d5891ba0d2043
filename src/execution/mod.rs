//! The execution engine: drives a plan through its workers.
//!
//! This module ties the rest of the crate together. It provides:
//!
//! - **Controller**: `ExecutionController` with the step evaluation loop
//! - **Events**: `ExecutionEvent` progress stream over an mpsc channel
//! - **Escalation**: the `EscalationHandler` seam for human decisions
//!
//! ## Evaluation order
//!
//! Each worker response goes through the same gauntlet, in order:
//! 1. Re-plan signal (invalidates the remaining steps outright)
//! 2. Loop detection over the attempt's action trail
//! 3. Completion validation
//!
//! Loop detection runs before validation so a looping worker cannot
//! talk its way into a clean completion. Forced completions (loop,
//! boundary, timeout, human override) are annotated on the record and
//! never mistaken for validated ones.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use conductor::execution::{AutoEscalation, EscalationOption, ExecutionController};
//! use conductor::plan::{Plan, Step, StepCategory};
//! use conductor::workers::WorkerRegistry;
//!
//! # async fn run() -> Result<(), conductor::errors::ExecutionError> {
//! let plan = Plan::new(
//!     "Summarize the quarterly report",
//!     vec![Step::new(
//!         0,
//!         "Read report",
//!         "Open quarterly-report.pdf and extract the key figures",
//!         StepCategory::InformationGathering,
//!     )],
//! );
//! let registry = WorkerRegistry::new();
//! let escalation = Arc::new(AutoEscalation::new(EscalationOption::Abort));
//! let mut controller = ExecutionController::new(plan, registry, escalation);
//! let report = controller.run_plan().await?;
//! println!("completed {} step(s)", report.completed);
//! # Ok(())
//! # }
//! ```

mod controller;
mod escalation;
mod events;

pub use controller::{ExecutionController, ExecutionReport, NextAction};
pub use escalation::{AutoEscalation, EscalationHandler, EscalationOption, EscalationPrompt};
pub use events::ExecutionEvent;
