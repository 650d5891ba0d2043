//! Loop detection over a step attempt's action history.
//!
//! Workers report discrete actions while executing a step. The detector
//! inspects that history (current attempt only, never across steps) and
//! flags unproductive repetition before any content validation runs, so a
//! verbose-but-looping response is never mistaken for completion.
//!
//! Rules, checked in order:
//! 1. The same action signature (`kind:normalized_target`) repeats beyond
//!    the configured allowance (default: no repeats at all)
//! 2. A navigation cycle: mostly navigations bouncing between very few
//!    targets within a short window
//! 3. A single target visited too many times across different action kinds
//! 4. A rolling window of actions that reaches no target the attempt has
//!    not already seen

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

// Compile regexes once using LazyLock
static TRACKING_PARAMS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[?&](utm_[a-z]+|ref|fbclid|gclid)=[^&#]*").unwrap());

static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Kind of discrete action a worker reports while executing a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Open a page or location.
    Navigate,
    /// Click an element.
    Click,
    /// Type into a field.
    Input,
    /// Scroll a page.
    Scroll,
    /// Run a search query.
    Search,
    /// Execute code or a command.
    Execute,
    /// Read a file.
    ReadFile,
    /// Write or modify a file.
    WriteFile,
    /// Generate content (text, image).
    Generate,
    /// Anything the worker could not classify.
    Other,
}

impl ActionKind {
    /// Stable snake_case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Click => "click",
            Self::Input => "input",
            Self::Scroll => "scroll",
            Self::Search => "search",
            Self::Execute => "execute",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::Generate => "generate",
            Self::Other => "other",
        }
    }
}

/// One discrete action reported by a worker during a step attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    /// What the action touched: a URL, file path, query, or command.
    pub target: String,
    pub at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            at: Utc::now(),
        }
    }

    /// Signature used for repetition checks.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.kind.as_str(), normalize_target(&self.target))
    }
}

/// Canonical form of an action target.
///
/// Case-folds, collapses whitespace, and for URLs strips the fragment,
/// tracking query parameters, and trailing slashes, so cosmetic variants
/// of the same location produce the same signature.
pub fn normalize_target(target: &str) -> String {
    let mut t = WHITESPACE_REGEX
        .replace_all(target.trim(), " ")
        .to_lowercase();
    if let Some(idx) = t.find('#') {
        t.truncate(idx);
    }
    let mut t = TRACKING_PARAMS_REGEX.replace_all(&t, "").into_owned();
    // Dropping "?utm_x=y" can leave "&q=1" without its "?".
    if !t.contains('?') {
        if let Some(amp) = t.find('&') {
            t.replace_range(amp..=amp, "?");
        }
    }
    while t.ends_with('/') || t.ends_with('?') || t.ends_with('&') {
        t.pop();
    }
    t
}

/// What the controller should do about a detected loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopRecommendation {
    /// Some useful output exists; mark the step complete with partial
    /// evidence rather than burning more attempts.
    ForceCompleteWithPartialEvidence,
    /// Nothing useful was gathered; retry with a different approach.
    RetryWithDifferentApproach,
}

/// Result of a loop check over one step attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCheck {
    pub detected: bool,
    /// Description of the repetition pattern, when detected.
    pub pattern: Option<String>,
    pub recommendation: Option<LoopRecommendation>,
}

impl LoopCheck {
    fn clear() -> Self {
        Self {
            detected: false,
            pattern: None,
            recommendation: None,
        }
    }

    fn flagged(pattern: String, recommendation: LoopRecommendation) -> Self {
        Self {
            detected: true,
            pattern: Some(pattern),
            recommendation: Some(recommendation),
        }
    }
}

/// Configuration for loop detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// How often the same action signature may repeat. 1 means a signature
    /// may appear once; its second occurrence is a loop.
    pub max_repeats: usize,
    /// Window size for the no-new-targets check.
    pub stale_window: usize,
    /// Window size for the navigation cycle check.
    pub nav_cycle_window: usize,
    /// Minimum navigations within the window to call it a cycle.
    pub nav_cycle_min_navigations: usize,
    /// Maximum distinct navigation targets for the window to count as a cycle.
    pub nav_cycle_max_targets: usize,
    /// How many times one target may be visited across all action kinds.
    pub max_target_visits: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_repeats: 1,
            stale_window: 5,
            nav_cycle_window: 4,
            nav_cycle_min_navigations: 3,
            nav_cycle_max_targets: 2,
            max_target_visits: 3,
        }
    }
}

/// Abstraction over loop detection so the engine depends only on the
/// check result, not the matching technique.
/// Real implementation: `LoopDetector` (rule-based). A learned classifier
/// can be slotted in behind this trait without touching the engine.
pub trait LoopPolicy: Send + Sync {
    fn detect(&self, history: &[ActionRecord], has_partial_output: bool) -> LoopCheck;
}

/// Rule-based loop detector.
#[derive(Debug, Clone, Default)]
pub struct LoopDetector {
    config: LoopConfig,
}

impl LoopDetector {
    pub fn new(config: LoopConfig) -> Self {
        Self { config }
    }

    fn recommend(has_partial_output: bool) -> LoopRecommendation {
        if has_partial_output {
            LoopRecommendation::ForceCompleteWithPartialEvidence
        } else {
            LoopRecommendation::RetryWithDifferentApproach
        }
    }

    /// Rule 1: the same signature repeats beyond the allowance.
    fn check_signature_repeats(&self, history: &[ActionRecord]) -> Option<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for action in history {
            let sig = action.signature();
            let count = counts.entry(sig.clone()).or_insert(0);
            *count += 1;
            if *count > self.config.max_repeats {
                return Some(format!("action '{sig}' repeated {count} times"));
            }
        }
        None
    }

    /// Rule 2: navigations bouncing between very few targets.
    fn check_navigation_cycle(&self, history: &[ActionRecord]) -> Option<String> {
        if history.len() < self.config.nav_cycle_window {
            return None;
        }
        let window = &history[history.len() - self.config.nav_cycle_window..];
        let nav_targets: Vec<String> = window
            .iter()
            .filter(|a| a.kind == ActionKind::Navigate)
            .map(|a| normalize_target(&a.target))
            .collect();
        if nav_targets.len() < self.config.nav_cycle_min_navigations {
            return None;
        }
        let distinct: HashSet<&String> = nav_targets.iter().collect();
        if distinct.len() <= self.config.nav_cycle_max_targets {
            return Some(format!(
                "navigation cycle: {} navigations across {} target(s) in the last {} actions",
                nav_targets.len(),
                distinct.len(),
                self.config.nav_cycle_window
            ));
        }
        None
    }

    /// Rule 3: one target hammered across different action kinds.
    fn check_target_visits(&self, history: &[ActionRecord]) -> Option<String> {
        let mut visits: HashMap<String, usize> = HashMap::new();
        for action in history {
            let target = normalize_target(&action.target);
            if target.is_empty() {
                continue;
            }
            let count = visits.entry(target.clone()).or_insert(0);
            *count += 1;
            if *count > self.config.max_target_visits {
                return Some(format!("target '{target}' visited {count} times"));
            }
        }
        None
    }

    /// Rule 4: a full window of actions reaching only already-seen targets.
    fn check_stale_window(&self, history: &[ActionRecord]) -> Option<String> {
        let window = self.config.stale_window;
        if history.len() < window * 2 {
            // Need enough history before the window for "already seen" to
            // mean anything.
            return None;
        }
        let split = history.len() - window;
        let earlier: HashSet<String> = history[..split]
            .iter()
            .map(|a| normalize_target(&a.target))
            .collect();
        let all_seen = history[split..]
            .iter()
            .all(|a| earlier.contains(&normalize_target(&a.target)));
        if all_seen {
            return Some(format!("no new targets reached in the last {window} actions"));
        }
        None
    }
}

impl LoopPolicy for LoopDetector {
    fn detect(&self, history: &[ActionRecord], has_partial_output: bool) -> LoopCheck {
        if history.is_empty() {
            return LoopCheck::clear();
        }
        let pattern = self
            .check_signature_repeats(history)
            .or_else(|| self.check_navigation_cycle(history))
            .or_else(|| self.check_target_visits(history))
            .or_else(|| self.check_stale_window(history));
        match pattern {
            Some(p) => LoopCheck::flagged(p, Self::recommend(has_partial_output)),
            None => LoopCheck::clear(),
        }
    }
}
