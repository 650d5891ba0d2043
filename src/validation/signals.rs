//! Completion signal parsing from worker responses.
//!
//! Extracts the markers and phrase-level signals the validator reasons
//! about:
//! - `<step-complete/>` — the step-scoped completion marker
//! - `<task-complete/>` — the whole-task marker, deliberately ignored for
//!   single-step validation
//! - `<plan-invalid>JSON</plan-invalid>` — a worker declaring the
//!   remaining plan wrong, with an optional replacement step list
//! - deflection phrasing, category behavior signals, error and recovery
//!   language

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::plan::{CompletionKind, StepCategory, StepDescriptor};
use crate::util::extract_json_object;

// Compile regexes once using LazyLock
static STEP_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<step-complete\s*/?>").unwrap());

static TASK_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<task-complete\s*/?>").unwrap());

static PLAN_INVALID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<plan-invalid>(.*?)</plan-invalid>").unwrap());

static DEFLECTION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(i understand|i can help you|let me help you|i'd be happy to help|would you like me to|could you clarify|what would you like|how can i assist)\b",
    )
    .unwrap()
});

/// Phrases suggesting something went wrong along the way.
const ERROR_PHRASES: &[&str] = &[
    "error", "failed", "exception", "could not", "unable to", "problem",
];

/// Phrases suggesting the worker recovered and still made progress.
const RECOVERY_PHRASES: &[&str] = &[
    "however", "instead", "managed to", "eventually", "worked around", "despite", "retried",
];

/// Phrases suggesting an alternate method was used.
const FALLBACK_PHRASES: &[&str] = &[
    "alternative", "fallback", "different approach", "workaround", "instead used", "plan b",
];

/// Whether the response carries the step-scoped completion marker.
pub fn has_step_marker(text: &str) -> bool {
    STEP_MARKER_REGEX.is_match(text)
}

/// Whether the response carries the whole-task marker. A task marker is
/// not evidence that *this* step finished.
pub fn has_task_marker(text: &str) -> bool {
    TASK_MARKER_REGEX.is_match(text)
}

/// Whether the response is a generic deflection: help-offer phrasing, or
/// a short clarifying question with no action behind it.
pub fn is_deflection(text: &str) -> bool {
    let trimmed = text.trim();
    if DEFLECTION_REGEX.is_match(trimmed) {
        return true;
    }
    trimmed.ends_with('?') && trimmed.chars().count() < 200
}

/// Behavior-level completion phrases per step category.
pub fn category_signals(category: StepCategory) -> &'static [&'static str] {
    match category {
        StepCategory::InformationGathering => &[
            "found",
            "located",
            "retrieved",
            "the answer is",
            "according to",
            "search results show",
            "identified",
        ],
        StepCategory::ContentGeneration => &[
            "generated", "created", "wrote", "drafted", "produced", "composed",
        ],
        StepCategory::DocumentAssembly => &[
            "assembled",
            "combined",
            "merged",
            "compiled",
            "document is ready",
            "put together",
        ],
        StepCategory::FormatConversion => &[
            "converted", "transformed", "exported", "saved as", "now in",
        ],
        StepCategory::FileOperation => &[
            "saved",
            "moved",
            "copied",
            "renamed",
            "deleted",
            "wrote the file",
            "file is at",
        ],
        StepCategory::CodeExecution => &[
            "executed",
            "ran",
            "output was",
            "exit code",
            "completed successfully",
            "script finished",
        ],
    }
}

/// Whether the response contains a behavior-level completion signal for
/// the step's category.
pub fn has_behavior_signal(text: &str, category: StepCategory) -> bool {
    let lower = text.to_lowercase();
    category_signals(category).iter().any(|s| lower.contains(s))
}

fn contains_any(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| lower.contains(p))
}

pub fn mentions_error(text: &str) -> bool {
    contains_any(&text.to_lowercase(), ERROR_PHRASES)
}

pub fn mentions_recovery(text: &str) -> bool {
    contains_any(&text.to_lowercase(), RECOVERY_PHRASES)
}

/// Classify how a completion was reached from the response wording.
pub fn scan_completion_kind(text: &str) -> CompletionKind {
    let lower = text.to_lowercase();
    if contains_any(&lower, FALLBACK_PHRASES) {
        CompletionKind::Fallback
    } else if contains_any(&lower, ERROR_PHRASES) {
        CompletionKind::WithErrors
    } else {
        CompletionKind::Normal
    }
}

/// A worker's declaration that the remaining plan is no longer valid.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplanRequest {
    pub reason: String,
    #[serde(default)]
    pub remaining_steps_invalid: bool,
    /// Replacement descriptors for the remaining steps, when the worker
    /// proposes them.
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
}

/// Extract a re-plan request from a response, if one is present.
pub fn parse_replan_request(text: &str) -> Option<ReplanRequest> {
    let cap = PLAN_INVALID_REGEX.captures(text)?;
    let body = cap.get(1)?.as_str();
    let json = extract_json_object(body)?;
    serde_json::from_str(&json).ok()
}
