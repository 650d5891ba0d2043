//! Completion validation for worker responses.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::plan::{CompletionKind, Step, StepExecutionRecord, WorkerResponse};
use crate::util::keyword_overlap;
use crate::validation::signals::{
    has_behavior_signal, has_step_marker, has_task_marker, is_deflection, mentions_error,
    mentions_recovery, scan_completion_kind,
};

/// Configuration for completion validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Responses shorter than this are never informative enough.
    pub min_response_chars: usize,
    /// Approvals below this confidence are re-checked by the semantic
    /// policy when one is configured.
    pub confidence_threshold: f64,
    /// Keyword overlap below this means the content is off-topic.
    pub relevance_threshold: f64,
    /// Attempt count from which weak evidence is accepted.
    pub adaptation_attempts: u32,
    /// Attempt count from which minimal output is accepted.
    pub progression_attempts: u32,
    /// Whether to run the secondary semantic policy at all.
    pub semantic_check: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_response_chars: 50,
            confidence_threshold: 0.7,
            relevance_threshold: 0.1,
            adaptation_attempts: 5,
            progression_attempts: 10,
            semantic_check: false,
        }
    }
}

/// Result of validating one response against one step.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub approved: bool,
    /// How the completion should be annotated, when approved.
    pub kind: Option<CompletionKind>,
    /// 0.0 to 1.0 certainty in the decision.
    pub confidence: f64,
    /// Why the decision came out this way.
    pub reason: String,
    /// Supporting observations for the record's evidence trail.
    pub evidence: Vec<String>,
}

impl ValidationOutcome {
    fn rejected(reason: impl Into<String>, evidence: Vec<String>) -> Self {
        Self {
            approved: false,
            kind: None,
            confidence: 0.0,
            reason: reason.into(),
            evidence,
        }
    }

    fn approved(
        kind: CompletionKind,
        confidence: f64,
        reason: impl Into<String>,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            approved: true,
            kind: Some(kind),
            confidence,
            reason: reason.into(),
            evidence,
        }
    }
}

/// Abstraction over completion checking so the engine depends only on
/// the `{approved, evidence}` contract, not the matching technique.
/// Real implementation: `CompletionValidator` (rule-based). A learned
/// classifier can be slotted in behind this trait, or attached as the
/// validator's secondary veto policy.
pub trait CompletionPolicy: Send + Sync {
    fn validate(
        &self,
        response: &WorkerResponse,
        step: &Step,
        record: &StepExecutionRecord,
    ) -> ValidationOutcome;
}

/// Rule-based completion validator.
///
/// Decides in two phases: hard guards that reject outright (wrong step,
/// wrong worker, too short, deflection), then a signal cascade from the
/// strongest evidence down. Weak tiers are only accepted once the attempt
/// count shows the strict bar is not being met.
pub struct CompletionValidator {
    config: ValidationConfig,
    /// Optional secondary check with veto power over low-confidence
    /// approvals.
    semantic: Option<Arc<dyn CompletionPolicy>>,
}

impl Default for CompletionValidator {
    fn default() -> Self {
        Self {
            config: ValidationConfig::default(),
            semantic: None,
        }
    }
}

impl CompletionValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            semantic: None,
        }
    }

    /// Attach a secondary policy consulted on approvals below the
    /// confidence threshold. It can veto, never approve on its own.
    pub fn with_semantic_policy(mut self, policy: Arc<dyn CompletionPolicy>) -> Self {
        self.semantic = Some(policy);
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }
}

impl CompletionPolicy for CompletionValidator {
    fn validate(
        &self,
        response: &WorkerResponse,
        step: &Step,
        record: &StepExecutionRecord,
    ) -> ValidationOutcome {
        // Hard guards. A response is only ever judged against the step it
        // was dispatched for, by the worker it was dispatched to.
        if response.step_index != step.index {
            return ValidationOutcome::rejected(
                format!(
                    "response was produced for step {} but evaluated against step {}",
                    response.step_index + 1,
                    step.index + 1
                ),
                Vec::new(),
            );
        }
        if let Some(assigned) = &step.assigned_worker {
            if assigned != &response.worker {
                return ValidationOutcome::rejected(
                    format!(
                        "response came from worker '{}' but the step is assigned to '{}'",
                        response.worker, assigned
                    ),
                    Vec::new(),
                );
            }
        }

        let text = response.content.trim();
        let length = text.chars().count();
        if length < self.config.min_response_chars {
            return ValidationOutcome::rejected(
                format!(
                    "response too short to be informative ({length} chars, minimum {})",
                    self.config.min_response_chars
                ),
                Vec::new(),
            );
        }
        if is_deflection(text) {
            return ValidationOutcome::rejected(
                "generic deflection with no action taken",
                vec![format!("deflecting response: {:?}", summarize(text))],
            );
        }

        let relevance = keyword_overlap(text, &step.relevance_text());
        let mut evidence = vec![format!("relevance {relevance:.2} against step wording")];
        if has_task_marker(text) && !has_step_marker(text) {
            evidence.push("task-level marker present; ignored for step validation".to_string());
        }

        // Signal cascade, strongest evidence first.
        let (confidence, kind, tier) = if has_step_marker(text) {
            (0.95, scan_completion_kind(text), "explicit completion marker")
        } else if has_behavior_signal(text, step.category)
            && relevance >= self.config.relevance_threshold
        {
            (0.8, scan_completion_kind(text), "behavioral completion signal")
        } else if relevance >= self.config.relevance_threshold * 2.0
            && length >= self.config.min_response_chars * 3
        {
            (0.7, scan_completion_kind(text), "substantive, topically relevant content")
        } else if mentions_error(text)
            && mentions_recovery(text)
            && relevance >= self.config.relevance_threshold
        {
            (0.6, CompletionKind::WithErrors, "recovered from errors with usable output")
        } else if relevance > 0.0 {
            if record.attempts < self.config.adaptation_attempts {
                return ValidationOutcome::rejected(
                    format!(
                        "no completion signal; weak topical evidence only (relevance {relevance:.2})"
                    ),
                    evidence,
                );
            }
            (
                0.5,
                CompletionKind::Fallback,
                "weak evidence accepted under adapted expectations",
            )
        } else if record.attempts >= self.config.progression_attempts {
            (
                0.4,
                CompletionKind::Fallback,
                "minimal output accepted under fallback progression",
            )
        } else {
            return ValidationOutcome::rejected(
                "no completion signal and content is not relevant to the step",
                evidence,
            );
        };

        evidence.push(format!("{tier} (confidence {confidence:.2})"));
        let outcome = ValidationOutcome::approved(kind, confidence, tier, evidence);

        // Rule-based approval gates the semantic check; the semantic
        // check can only veto, and only below the confidence threshold.
        if self.config.semantic_check && outcome.confidence < self.config.confidence_threshold {
            if let Some(semantic) = &self.semantic {
                let second = semantic.validate(response, step, record);
                if !second.approved {
                    return ValidationOutcome::rejected(
                        format!("semantic check vetoed approval: {}", second.reason),
                        outcome.evidence,
                    );
                }
            }
        }

        outcome
    }
}

fn summarize(text: &str) -> String {
    crate::util::truncate_chars(text, 80)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{StepCategory, StepStatus};

    fn assigned_step(category: StepCategory, title: &str, instruction: &str) -> Step {
        let mut step = Step::new(0, title, instruction, category);
        step.assigned_worker = Some("browser".to_string());
        step
    }

    fn record_with_attempts(attempts: u32) -> StepExecutionRecord {
        let mut record = StepExecutionRecord::new(0);
        for _ in 0..attempts {
            record.begin_attempt("browser");
        }
        record
    }

    fn response(content: &str) -> WorkerResponse {
        WorkerResponse::new("browser", 0, content)
    }

    fn research_step() -> Step {
        assigned_step(
            StepCategory::InformationGathering,
            "Find revenue",
            "Search for the quarterly revenue figures and report them",
        )
    }

    // =========================================
    // Hard guards
    // =========================================

    #[test]
    fn test_rejects_response_for_different_step() {
        let validator = CompletionValidator::default();
        let step = research_step();
        let record = record_with_attempts(1);
        let stale = WorkerResponse::new("browser", 3, "Found the quarterly revenue figures.");
        let outcome = validator.validate(&stale, &step, &record);
        assert!(!outcome.approved);
        assert!(outcome.reason.contains("produced for step 4"));
    }

    #[test]
    fn test_rejects_response_from_wrong_worker() {
        let validator = CompletionValidator::default();
        let step = research_step();
        let record = record_with_attempts(1);
        let wrong = WorkerResponse::new("coder", 0, "Found the quarterly revenue figures online.");
        let outcome = validator.validate(&wrong, &step, &record);
        assert!(!outcome.approved);
        assert!(outcome.reason.contains("assigned to 'browser'"));
    }

    #[test]
    fn test_rejects_short_response_despite_relevant_keywords() {
        let validator = CompletionValidator::default();
        let outcome = validator.validate(
            &response("Revenue figures found."),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(!outcome.approved);
        assert!(outcome.reason.contains("too short"));
    }

    #[test]
    fn test_rejects_deflection_despite_relevant_keywords() {
        let validator = CompletionValidator::default();
        let outcome = validator.validate(
            &response(
                "I understand. I can help you find the quarterly revenue figures whenever you are ready.",
            ),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(!outcome.approved);
        assert!(outcome.reason.contains("deflection"));
    }

    // =========================================
    // Signal cascade
    // =========================================

    #[test]
    fn test_explicit_marker_approves_clean_completion() {
        let validator = CompletionValidator::default();
        let outcome = validator.validate(
            &response(
                "The quarterly revenue figures are 4.2M, up 12% year over year. <step-complete/>",
            ),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(outcome.approved);
        assert_eq!(outcome.kind, Some(CompletionKind::Normal));
        assert!((outcome.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_behavior_signal_with_relevance_approves() {
        let validator = CompletionValidator::default();
        let outcome = validator.validate(
            &response(
                "I found the quarterly revenue figures on the investor relations page: 4.2M total.",
            ),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(outcome.approved);
        assert!((outcome.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_recovery_approves_with_errors_annotation() {
        let validator = CompletionValidator::default();
        let outcome = validator.validate(
            &response(
                "The first source failed with an error, however I managed to retrieve the \
                 quarterly revenue figures from the cached archive copy.",
            ),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(outcome.approved);
        assert_eq!(outcome.kind, Some(CompletionKind::WithErrors));
    }

    #[test]
    fn test_irrelevant_content_is_rejected() {
        let validator = CompletionValidator::default();
        let outcome = validator.validate(
            &response(
                "Cats sleep for most of day and enjoy sitting near warm windows when possible.",
            ),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(!outcome.approved);
    }

    #[test]
    fn test_task_marker_alone_does_not_approve() {
        let validator = CompletionValidator::default();
        let outcome = validator.validate(
            &response("Everything in the whole task should now be regarded as done. <task-complete/>"),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(!outcome.approved);
        assert!(
            outcome
                .evidence
                .iter()
                .any(|e| e.contains("task-level marker")),
            "evidence: {:?}",
            outcome.evidence
        );
    }

    // =========================================
    // Attempt-based adaptation
    // =========================================

    #[test]
    fn test_weak_evidence_rejected_early_accepted_late() {
        let validator = CompletionValidator::default();
        let weak = response(
            "Still working through sources about revenue; nothing definitive collected yet here.",
        );
        let step = research_step();

        let early = validator.validate(&weak, &step, &record_with_attempts(1));
        assert!(!early.approved);

        let late = validator.validate(&weak, &step, &record_with_attempts(5));
        assert!(late.approved);
        assert_eq!(late.kind, Some(CompletionKind::Fallback));
        assert!((late.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_status_is_untouched_by_validation() {
        let validator = CompletionValidator::default();
        let record = record_with_attempts(1);
        let _ = validator.validate(
            &response("I found the quarterly revenue figures: 4.2M."),
            &research_step(),
            &record,
        );
        assert_eq!(record.status, StepStatus::InProgress);
    }

    // =========================================
    // Semantic veto
    // =========================================

    struct AlwaysReject;

    impl CompletionPolicy for AlwaysReject {
        fn validate(
            &self,
            _response: &WorkerResponse,
            _step: &Step,
            _record: &StepExecutionRecord,
        ) -> ValidationOutcome {
            ValidationOutcome::rejected("not convincing", Vec::new())
        }
    }

    #[test]
    fn test_semantic_policy_vetoes_low_confidence_approval() {
        let config = ValidationConfig {
            semantic_check: true,
            ..ValidationConfig::default()
        };
        let validator =
            CompletionValidator::new(config).with_semantic_policy(Arc::new(AlwaysReject));

        // Error-recovery tier sits at 0.6, below the 0.7 threshold, so the
        // veto policy gets consulted.
        let outcome = validator.validate(
            &response(
                "The first source failed with an error, however I managed to retrieve the \
                 quarterly revenue figures from the cached archive copy.",
            ),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(!outcome.approved);
        assert!(outcome.reason.contains("semantic check vetoed"));
    }

    #[test]
    fn test_semantic_policy_skipped_for_high_confidence() {
        let config = ValidationConfig {
            semantic_check: true,
            ..ValidationConfig::default()
        };
        let validator =
            CompletionValidator::new(config).with_semantic_policy(Arc::new(AlwaysReject));

        let outcome = validator.validate(
            &response("Found the quarterly revenue figures: 4.2M. <step-complete/>"),
            &research_step(),
            &record_with_attempts(1),
        );
        assert!(outcome.approved, "0.95 confidence must not consult the veto policy");
    }
}
