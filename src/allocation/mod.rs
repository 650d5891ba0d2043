//! Worker allocation for Conductor.
//!
//! Maps each step's declared intent to the worker capability best suited
//! to execute it: category match first, keyword affinity second, with a
//! small set of hard override rules on top and a web fallback at the
//! bottom.

mod allocator;
mod profiles;

pub use allocator::{AgentAllocator, AllocationDecision, PreviousAllocation};
pub use profiles::{
    AgentCapabilityProfile, BROWSER_WORKER_ID, CODER_WORKER_ID, FILE_WORKER_ID, built_in_profiles,
};
