//! Plan model and execution state for Conductor.
//!
//! This module owns the shared truth of a run. It provides:
//!
//! - **Types**: Steps, categories, statuses, and per-step execution records
//! - **Parsing**: Loading and validating plan files (JSON or YAML)
//! - **Store**: The in-memory `PlanStore` with compare-and-set advancement
//! - **Storage**: Persistence backends behind the `PlanStorage` trait
//!
//! ## Invariants
//!
//! The store enforces the rules everything else relies on:
//! 1. The current step index only moves through `PlanStore::try_advance`
//! 2. At most one step is `in_progress` at a time
//! 3. Plan edits outside the engine are caught by fingerprint comparison
//!
//! ## Example
//!
//! ```no_run
//! use conductor::plan::{Plan, PlanStore, Step, StepCategory};
//!
//! let plan = Plan::new(
//!     "Summarize the quarterly report",
//!     vec![Step::new(
//!         0,
//!         "Read report",
//!         "Open quarterly-report.pdf and extract the key figures",
//!         StepCategory::InformationGathering,
//!     )],
//! );
//! let store = PlanStore::new(plan);
//! assert_eq!(store.current_step_index(), 0);
//! ```

mod parser;
mod storage;
mod store;
mod types;

pub use parser::{lint_plan, load_plan_file};
pub use storage::{JsonFileStorage, MemoryStorage, PlanStorage};
pub use store::{PlanState, PlanStore};
pub use types::{
    CompletionKind, Plan, Step, StepCategory, StepDescriptor, StepExecutionRecord, StepStatus,
    WorkerResponse,
};
