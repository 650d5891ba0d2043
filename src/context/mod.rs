//! Cross-step context for Conductor.
//!
//! Completed steps leave behind a compact snapshot (facts, artifact
//! references, trimmed summary). Later steps get a filtered, compressed
//! view of those snapshots selected by relevance and bounded by a
//! character budget, rather than the full history.

mod extract;
mod manager;

pub use extract::{extract_artifacts, extract_facts};
pub use manager::{ContextEntry, ContextManager};
