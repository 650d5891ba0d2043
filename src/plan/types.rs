//! Core types for plan-driven execution.
//!
//! These types represent a plan, its steps, and the mutable execution
//! record kept for each step while the engine drives it to a terminal
//! status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not been dispatched yet.
    #[default]
    NotStarted,
    /// Step is currently being executed by a worker.
    InProgress,
    /// Step finished and was approved (or force-completed with annotation).
    Completed,
    /// Step exhausted its attempts without approval.
    Failed,
    /// Step was skipped by human decision or re-planning.
    Skipped,
}

impl StepStatus {
    /// Check if the step is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Check if the step completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Capability category a step is bound to.
///
/// The category drives worker allocation and the boundary profile lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepCategory {
    /// Research, browsing, looking things up.
    InformationGathering,
    /// Producing new content (text, images).
    ContentGeneration,
    /// Combining prior outputs into a document.
    DocumentAssembly,
    /// Converting an artifact between formats.
    FormatConversion,
    /// Reading, moving, or writing files.
    FileOperation,
    /// Running code or scripts.
    CodeExecution,
}

impl StepCategory {
    /// All categories, in declaration order.
    pub fn all() -> [StepCategory; 6] {
        [
            Self::InformationGathering,
            Self::ContentGeneration,
            Self::DocumentAssembly,
            Self::FormatConversion,
            Self::FileOperation,
            Self::CodeExecution,
        ]
    }

    /// Stable kebab-case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InformationGathering => "information-gathering",
            Self::ContentGeneration => "content-generation",
            Self::DocumentAssembly => "document-assembly",
            Self::FormatConversion => "format-conversion",
            Self::FileOperation => "file-operation",
            Self::CodeExecution => "code-execution",
        }
    }
}

impl std::fmt::Display for StepCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "information-gathering" => Ok(Self::InformationGathering),
            "content-generation" => Ok(Self::ContentGeneration),
            "document-assembly" => Ok(Self::DocumentAssembly),
            "format-conversion" => Ok(Self::FormatConversion),
            "file-operation" => Ok(Self::FileOperation),
            "code-execution" => Ok(Self::CodeExecution),
            _ => anyhow::bail!(
                "Invalid step category '{}'. Valid values: information-gathering, \
                 content-generation, document-assembly, format-conversion, \
                 file-operation, code-execution",
                s
            ),
        }
    }
}

/// How a completed step reached `Completed`.
///
/// Anything other than `Normal` tells downstream steps (and human readers
/// of the journal) to treat the output with some caution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// Validator approved a clean completion signal.
    #[default]
    Normal,
    /// Approved, but the worker reported recoverable errors along the way.
    WithErrors,
    /// Approved, but the worker used an alternate method to get there.
    Fallback,
    /// Action budget ran out; partial output was accepted.
    Boundary,
    /// Time budget ran out; partial output was accepted.
    Timeout,
    /// Loop detection forced completion with whatever was gathered.
    Forced,
}

impl CompletionKind {
    /// Base quality multiplier for this completion kind.
    pub fn base_quality(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::WithErrors => 0.85,
            Self::Boundary => 0.8,
            Self::Fallback => 0.75,
            Self::Forced => 0.6,
            Self::Timeout => 0.5,
        }
    }

    /// Whether this completion was triggered by a limit rather than the
    /// validator's approval.
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Boundary | Self::Timeout | Self::Forced)
    }

    /// Stable snake_case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::WithErrors => "with_errors",
            Self::Fallback => "fallback",
            Self::Boundary => "boundary",
            Self::Timeout => "timeout",
            Self::Forced => "forced",
        }
    }
}

/// External plan-input shape: one step as produced by the planning
/// capability (language model or human), before indices are assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDescriptor {
    /// Short human-readable step name.
    pub title: String,
    /// Free-text instruction handed to the worker.
    pub instruction: String,
    /// Declared capability category.
    pub category: StepCategory,
    /// What a correct outcome looks like, used by the validator.
    #[serde(default)]
    pub expected_outcome: Option<String>,
}

/// One unit of work in a plan, bound to exactly one capability category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Stable index, unique within the plan.
    pub index: usize,
    /// Short human-readable step name.
    pub title: String,
    /// Free-text instruction handed to the worker.
    pub instruction: String,
    /// Declared capability category.
    pub category: StepCategory,
    /// Worker identity, set by the allocator.
    #[serde(default)]
    pub assigned_worker: Option<String>,
    /// What a correct outcome looks like, used by the validator.
    #[serde(default)]
    pub expected_outcome: Option<String>,
}

impl Step {
    /// Create a new step.
    pub fn new(index: usize, title: &str, instruction: &str, category: StepCategory) -> Self {
        Self {
            index,
            title: title.to_string(),
            instruction: instruction.to_string(),
            category,
            assigned_worker: None,
            expected_outcome: None,
        }
    }

    /// Set the expected outcome description.
    pub fn with_expected_outcome(mut self, outcome: &str) -> Self {
        self.expected_outcome = Some(outcome.to_string());
        self
    }

    /// Build a step from an external descriptor at the given index.
    pub fn from_descriptor(index: usize, descriptor: StepDescriptor) -> Self {
        Self {
            index,
            title: descriptor.title,
            instruction: descriptor.instruction,
            category: descriptor.category,
            assigned_worker: None,
            expected_outcome: descriptor.expected_outcome,
        }
    }

    /// Text the validator and allocator match keywords against:
    /// title, instruction, and expected outcome (not the whole task).
    pub fn relevance_text(&self) -> String {
        match &self.expected_outcome {
            Some(outcome) => format!("{} {} {}", self.title, self.instruction, outcome),
            None => format!("{} {}", self.title, self.instruction),
        }
    }
}

/// A worker's terminal response for one step attempt.
///
/// Carries the step index it was dispatched for so stale responses can
/// never be evaluated against a different step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerResponse {
    /// Identity of the worker that produced this response.
    pub worker: String,
    /// Step index the dispatch was issued for.
    pub step_index: usize,
    /// Free-text response body.
    pub content: String,
    /// When the response was received.
    pub received_at: DateTime<Utc>,
}

impl WorkerResponse {
    /// Create a new response stamped with the current time.
    pub fn new(worker: &str, step_index: usize, content: &str) -> Self {
        Self {
            worker: worker.to_string(),
            step_index,
            content: content.to_string(),
            received_at: Utc::now(),
        }
    }
}

/// Mutable execution record for one step.
///
/// Response history is scoped to the current attempt: `begin_attempt`
/// clears it, and nothing else ever copies it to another record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    /// Index of the step this record belongs to.
    pub step_index: usize,
    /// Current status.
    #[serde(default)]
    pub status: StepStatus,
    /// Number of attempts dispatched so far.
    #[serde(default)]
    pub attempts: u32,
    /// Worker identity the current attempt was dispatched to.
    #[serde(default)]
    pub assigned_worker: Option<String>,
    /// Responses accumulated during the current attempt only.
    #[serde(default)]
    pub responses: Vec<WorkerResponse>,
    /// When the current attempt started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Evidence strings justifying the last status transition.
    #[serde(default)]
    pub evidence: Vec<String>,
    /// How the step completed, when status is `Completed`.
    #[serde(default)]
    pub completion: Option<CompletionKind>,
    /// Quality score in [0, 1], when status is `Completed`.
    #[serde(default)]
    pub quality: Option<f64>,
}

impl StepExecutionRecord {
    /// Create a fresh record for a step.
    pub fn new(step_index: usize) -> Self {
        Self {
            step_index,
            status: StepStatus::NotStarted,
            attempts: 0,
            assigned_worker: None,
            responses: Vec::new(),
            started_at: None,
            finished_at: None,
            evidence: Vec::new(),
            completion: None,
            quality: None,
        }
    }

    /// Start a new attempt: increments the attempt counter, clears the
    /// previous attempt's responses, and marks the step in progress.
    ///
    /// This is the only place the attempt counter moves.
    pub fn begin_attempt(&mut self, worker: &str) {
        self.attempts += 1;
        self.status = StepStatus::InProgress;
        self.assigned_worker = Some(worker.to_string());
        self.responses.clear();
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    /// Append a response received during the current attempt.
    pub fn push_response(&mut self, response: WorkerResponse) {
        self.responses.push(response);
    }

    /// Append an evidence line.
    pub fn add_evidence(&mut self, evidence: impl Into<String>) {
        self.evidence.push(evidence.into());
    }

    /// Mark the step completed with its annotation and quality score.
    pub fn complete(&mut self, kind: CompletionKind, quality: f64, evidence: impl Into<String>) {
        self.status = StepStatus::Completed;
        self.completion = Some(kind);
        self.quality = Some(quality.clamp(0.0, 1.0));
        self.finished_at = Some(Utc::now());
        self.evidence.push(evidence.into());
    }

    /// Mark the step failed.
    pub fn fail(&mut self, evidence: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.evidence.push(evidence.into());
    }

    /// Mark the step skipped.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.finished_at = Some(Utc::now());
        self.evidence.push(reason.into());
    }

    /// Reopen a failed step for a fresh round of attempts. Resets the
    /// attempt counter so the retry budget starts over.
    pub fn reopen(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::NotStarted;
        self.attempts = 0;
        self.finished_at = None;
        self.completion = None;
        self.quality = None;
        self.evidence.push(reason.into());
    }

    /// Wall-clock duration of the current/last attempt, if it started.
    pub fn attempt_duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - start)
    }

    /// Check if the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The final response of the current attempt, if any arrived.
    pub fn last_response(&self) -> Option<&WorkerResponse> {
        self.responses.last()
    }
}

/// An ordered sequence of steps plus the original task description.
///
/// Immutable once execution starts except for controlled re-planning via
/// [`Plan::splice_remaining`], which preserves indices of already-executed
/// steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier.
    pub id: Uuid,
    /// The original user task this plan decomposes.
    pub task: String,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create a plan, re-indexing steps to their position.
    pub fn new(task: &str, steps: Vec<Step>) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(i, mut s)| {
                s.index = i;
                s
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            task: task.to_string(),
            steps,
            created_at: Utc::now(),
        }
    }

    /// Build a plan from external step descriptors.
    pub fn from_descriptors(task: &str, descriptors: Vec<StepDescriptor>) -> Self {
        let steps = descriptors
            .into_iter()
            .enumerate()
            .map(|(i, d)| Step::from_descriptor(i, d))
            .collect();
        Self {
            id: Uuid::new_v4(),
            task: task.to_string(),
            steps,
            created_at: Utc::now(),
        }
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Get a step by index.
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Replace all steps from `from_index` onward with new descriptors,
    /// re-indexed to follow the preserved prefix. Indices of steps before
    /// `from_index` are untouched.
    pub fn splice_remaining(&mut self, from_index: usize, descriptors: Vec<StepDescriptor>) {
        self.steps.truncate(from_index);
        for (offset, d) in descriptors.into_iter().enumerate() {
            self.steps.push(Step::from_descriptor(from_index + offset, d));
        }
    }

    /// Content fingerprint over the task and step definitions.
    ///
    /// Worker assignments are excluded so allocation does not look like
    /// external modification. Truncated hex for readability in journals.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.task.as_bytes());
        for step in &self.steps {
            hasher.update(step.index.to_le_bytes());
            hasher.update(step.title.as_bytes());
            hasher.update(step.instruction.as_bytes());
            hasher.update(step.category.as_str().as_bytes());
            if let Some(ref outcome) = step.expected_outcome {
                hasher.update(outcome.as_bytes());
            }
        }
        let result = hasher.finalize();
        format!("{:x}", result)[..12].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_step_plan() -> Plan {
        Plan::new(
            "Research rust orchestrators and produce a PDF report",
            vec![
                Step::new(
                    0,
                    "Research",
                    "Find three recent articles about task orchestration",
                    StepCategory::InformationGathering,
                ),
                Step::new(
                    0,
                    "Write report",
                    "Write a markdown report from the research findings",
                    StepCategory::DocumentAssembly,
                ),
                Step::new(
                    0,
                    "Convert",
                    "Convert report.md to PDF",
                    StepCategory::FormatConversion,
                ),
            ],
        )
    }

    // =========================================
    // StepStatus tests
    // =========================================

    #[test]
    fn test_step_status_default() {
        assert_eq!(StepStatus::default(), StepStatus::NotStarted);
    }

    #[test]
    fn test_step_status_terminal() {
        assert!(!StepStatus::NotStarted.is_terminal());
        assert!(!StepStatus::InProgress.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_step_status_serialization() {
        assert_eq!(
            serde_json::to_string(&StepStatus::NotStarted).unwrap(),
            "\"not_started\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    // =========================================
    // StepCategory tests
    // =========================================

    #[test]
    fn test_category_serialization_is_kebab_case() {
        assert_eq!(
            serde_json::to_string(&StepCategory::InformationGathering).unwrap(),
            "\"information-gathering\""
        );
        assert_eq!(
            serde_json::to_string(&StepCategory::CodeExecution).unwrap(),
            "\"code-execution\""
        );
    }

    #[test]
    fn test_category_from_str_round_trip() {
        for category in StepCategory::all() {
            let parsed: StepCategory = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn test_category_from_str_rejects_unknown() {
        let result = "telepathy".parse::<StepCategory>();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("telepathy"));
    }

    // =========================================
    // CompletionKind tests
    // =========================================

    #[test]
    fn test_completion_kind_quality_ordering() {
        assert!(CompletionKind::Normal.base_quality() > CompletionKind::Boundary.base_quality());
        assert!(CompletionKind::Boundary.base_quality() > CompletionKind::Forced.base_quality());
        assert!(CompletionKind::Forced.base_quality() > CompletionKind::Timeout.base_quality());
    }

    #[test]
    fn test_completion_kind_forced_flags() {
        assert!(!CompletionKind::Normal.is_forced());
        assert!(!CompletionKind::WithErrors.is_forced());
        assert!(!CompletionKind::Fallback.is_forced());
        assert!(CompletionKind::Boundary.is_forced());
        assert!(CompletionKind::Timeout.is_forced());
        assert!(CompletionKind::Forced.is_forced());
    }

    // =========================================
    // StepExecutionRecord tests
    // =========================================

    #[test]
    fn test_record_begin_attempt_clears_previous_responses() {
        let mut record = StepExecutionRecord::new(0);
        record.begin_attempt("browser");
        record.push_response(WorkerResponse::new("browser", 0, "first attempt output"));
        assert_eq!(record.responses.len(), 1);

        record.begin_attempt("browser");
        assert_eq!(record.attempts, 2);
        assert!(
            record.responses.is_empty(),
            "responses must be scoped to the current attempt"
        );
        assert_eq!(record.status, StepStatus::InProgress);
    }

    #[test]
    fn test_record_complete_sets_annotation_and_quality() {
        let mut record = StepExecutionRecord::new(1);
        record.begin_attempt("coder");
        record.complete(CompletionKind::WithErrors, 0.7, "ran with 2 warnings");

        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.completion, Some(CompletionKind::WithErrors));
        assert_eq!(record.quality, Some(0.7));
        assert!(record.finished_at.is_some());
        assert_eq!(record.evidence.len(), 1);
    }

    #[test]
    fn test_record_complete_clamps_quality() {
        let mut record = StepExecutionRecord::new(0);
        record.begin_attempt("coder");
        record.complete(CompletionKind::Normal, 1.7, "x");
        assert_eq!(record.quality, Some(1.0));
    }

    #[test]
    fn test_record_fail_keeps_evidence_trail() {
        let mut record = StepExecutionRecord::new(2);
        record.begin_attempt("browser");
        record.add_evidence("attempt 1: generic deflection");
        record.fail("attempts exhausted");

        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(record.evidence.len(), 2);
        assert!(record.is_terminal());
    }

    #[test]
    fn test_record_reopen_resets_attempt_budget() {
        let mut record = StepExecutionRecord::new(1);
        for _ in 0..3 {
            record.begin_attempt("coder");
        }
        record.fail("attempts exhausted");
        record.reopen("Reopened by human decision");

        assert_eq!(record.status, StepStatus::NotStarted);
        assert_eq!(record.attempts, 0);
        assert!(record.finished_at.is_none());
        assert!(!record.is_terminal());

        record.begin_attempt("coder");
        assert_eq!(record.attempts, 1);
    }

    // =========================================
    // Plan tests
    // =========================================

    #[test]
    fn test_plan_new_reindexes_steps() {
        let plan = three_step_plan();
        let indices: Vec<usize> = plan.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_plan_fingerprint_is_stable() {
        let plan = three_step_plan();
        assert_eq!(plan.fingerprint(), plan.fingerprint());
        assert_eq!(plan.fingerprint().len(), 12);
    }

    #[test]
    fn test_plan_fingerprint_changes_with_content() {
        let plan = three_step_plan();
        let mut modified = plan.clone();
        modified.steps[1].instruction = "Write a haiku instead".to_string();
        assert_ne!(plan.fingerprint(), modified.fingerprint());
    }

    #[test]
    fn test_plan_fingerprint_ignores_worker_assignment() {
        let plan = three_step_plan();
        let mut allocated = plan.clone();
        allocated.steps[0].assigned_worker = Some("browser".to_string());
        assert_eq!(plan.fingerprint(), allocated.fingerprint());
    }

    #[test]
    fn test_splice_remaining_preserves_completed_prefix() {
        let mut plan = three_step_plan();
        let original_first = plan.steps[0].clone();

        plan.splice_remaining(
            1,
            vec![
                StepDescriptor {
                    title: "Summarize".to_string(),
                    instruction: "Summarize findings in plain text".to_string(),
                    category: StepCategory::ContentGeneration,
                    expected_outcome: None,
                },
                StepDescriptor {
                    title: "Save".to_string(),
                    instruction: "Save the summary to summary.txt".to_string(),
                    category: StepCategory::FileOperation,
                    expected_outcome: None,
                },
            ],
        );

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.steps[0], original_first);
        assert_eq!(plan.steps[1].index, 1);
        assert_eq!(plan.steps[1].title, "Summarize");
        assert_eq!(plan.steps[2].index, 2);
        assert_eq!(plan.steps[2].category, StepCategory::FileOperation);
    }

    #[test]
    fn test_from_descriptors_assigns_indices() {
        let plan = Plan::from_descriptors(
            "small task",
            vec![
                StepDescriptor {
                    title: "A".to_string(),
                    instruction: "do a".to_string(),
                    category: StepCategory::CodeExecution,
                    expected_outcome: Some("a done".to_string()),
                },
                StepDescriptor {
                    title: "B".to_string(),
                    instruction: "do b".to_string(),
                    category: StepCategory::FileOperation,
                    expected_outcome: None,
                },
            ],
        );
        assert_eq!(plan.steps[0].index, 0);
        assert_eq!(plan.steps[1].index, 1);
        assert_eq!(plan.steps[0].expected_outcome.as_deref(), Some("a done"));
    }
}
