//! Worker selection for plan steps.
//!
//! Scores every capability profile against a step and picks the best
//! match. Hard override rules run first: instructions that clearly demand
//! a specific capability (generate an image, open a URL) route there no
//! matter how the weighted score comes out.

use regex::Regex;
use std::sync::LazyLock;

use crate::allocation::profiles::{AgentCapabilityProfile, BROWSER_WORKER_ID};
use crate::boundary::IMAGE_WORKER_ID;
use crate::plan::{Step, StepCategory};

// Compile regexes once using LazyLock
static IMAGE_TRIGGER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(image|picture|photo|illustration|logo|drawing|painting)\b").unwrap()
});

static URL_TRIGGER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bhttps?://\S+|\bwww\.\S+").unwrap());

/// Weight of an exact category match.
const CATEGORY_WEIGHT: f64 = 0.6;
/// Weight of full keyword affinity.
const AFFINITY_WEIGHT: f64 = 0.4;
/// Affinity hits at which a profile earns the full affinity weight.
const AFFINITY_SATURATION: f64 = 3.0;
/// Bonus for reusing the worker that handled the previous step of the
/// same category.
const LOCALITY_BONUS: f64 = 0.05;
/// Score gap below which a decision is treated as a close call.
const CLOSE_CALL_GAP: f64 = 0.1;
/// Confidence multiplier applied to close calls.
const CLOSE_CALL_PENALTY: f64 = 0.75;
/// Confidence reported when nothing matched and the web fallback is used.
const FALLBACK_CONFIDENCE: f64 = 0.2;

/// The worker and category of the most recently completed step, used for
/// locality tie-breaking.
#[derive(Debug, Clone)]
pub struct PreviousAllocation {
    pub category: StepCategory,
    pub worker_id: String,
}

/// Outcome of allocating a step to a worker.
#[derive(Debug, Clone)]
pub struct AllocationDecision {
    pub worker_id: String,
    /// 0.0 to 1.0; callers escalate below their configured threshold.
    pub confidence: f64,
    /// Why this worker won, for evidence and logging.
    pub rationale: String,
}

impl AllocationDecision {
    pub fn is_confident(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// Maps a step's declared intent to the best-suited worker capability.
pub struct AgentAllocator {
    profiles: Vec<AgentCapabilityProfile>,
}

impl Default for AgentAllocator {
    fn default() -> Self {
        Self {
            profiles: crate::allocation::profiles::built_in_profiles(),
        }
    }
}

impl AgentAllocator {
    pub fn new(profiles: Vec<AgentCapabilityProfile>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[AgentCapabilityProfile] {
        &self.profiles
    }

    /// Pick the worker for a step.
    ///
    /// Override rules take precedence over the weighted score; ties are
    /// broken by locality, then declared priority.
    pub fn allocate(&self, step: &Step, previous: Option<&PreviousAllocation>) -> AllocationDecision {
        let text = step.relevance_text();

        if let Some(decision) = self.check_overrides(step, &text) {
            return decision;
        }

        let mut scored: Vec<(f64, &AgentCapabilityProfile, String)> = self
            .profiles
            .iter()
            .map(|profile| {
                let (score, rationale) = self.score(profile, step, &text, previous);
                (score, profile, rationale)
            })
            .collect();

        // Highest score first; priority breaks exact ties.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.priority.cmp(&b.1.priority))
        });

        let (top_score, top_profile, rationale) = match scored.first() {
            Some((score, profile, rationale)) if *score > 0.0 => {
                (*score, *profile, rationale.clone())
            }
            _ => {
                return AllocationDecision {
                    worker_id: BROWSER_WORKER_ID.to_string(),
                    confidence: FALLBACK_CONFIDENCE,
                    rationale: "no profile matched; defaulting to web capability".to_string(),
                };
            }
        };

        let mut confidence = top_score.min(1.0);
        let mut rationale = rationale;
        if let Some((second_score, second_profile, _)) = scored.get(1) {
            if second_profile.worker_id != top_profile.worker_id
                && (top_score - second_score) < CLOSE_CALL_GAP
            {
                confidence *= CLOSE_CALL_PENALTY;
                rationale.push_str(&format!(
                    "; close call with {}",
                    second_profile.worker_id
                ));
            }
        }

        AllocationDecision {
            worker_id: top_profile.worker_id.clone(),
            confidence,
            rationale,
        }
    }

    /// Hard override rules for categories that are easily confused.
    fn check_overrides(&self, step: &Step, text: &str) -> Option<AllocationDecision> {
        // An explicit image request always routes to the image worker,
        // even when the instruction also talks about documents or files.
        if step.category == StepCategory::ContentGeneration && IMAGE_TRIGGER_REGEX.is_match(text) {
            return Some(AllocationDecision {
                worker_id: IMAGE_WORKER_ID.to_string(),
                confidence: 0.95,
                rationale: "override: image generation trigger".to_string(),
            });
        }
        // An explicit URL in an information-gathering step goes to the web.
        if step.category == StepCategory::InformationGathering && URL_TRIGGER_REGEX.is_match(text) {
            return Some(AllocationDecision {
                worker_id: BROWSER_WORKER_ID.to_string(),
                confidence: 0.95,
                rationale: "override: explicit URL in instruction".to_string(),
            });
        }
        None
    }

    fn score(
        &self,
        profile: &AgentCapabilityProfile,
        step: &Step,
        text: &str,
        previous: Option<&PreviousAllocation>,
    ) -> (f64, String) {
        let lower = text.to_lowercase();
        let mut score = 0.0;
        let mut parts: Vec<String> = Vec::new();

        if profile.supports(step.category) {
            score += CATEGORY_WEIGHT;
            parts.push(format!("category {}", step.category));
        }

        let hits = profile
            .affinity
            .iter()
            .filter(|kw| lower.contains(kw.as_str()))
            .count();
        if hits > 0 {
            score += AFFINITY_WEIGHT * (hits as f64 / AFFINITY_SATURATION).min(1.0);
            parts.push(format!("{hits} affinity hit(s)"));
        }

        if let Some(prev) = previous {
            if prev.category == step.category && prev.worker_id == profile.worker_id {
                score += LOCALITY_BONUS;
                parts.push("locality".to_string());
            }
        }

        let rationale = if parts.is_empty() {
            "no match".to_string()
        } else {
            parts.join(" + ")
        };
        (score, rationale)
    }
}
