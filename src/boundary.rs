//! Per-step resource boundaries.
//!
//! Every step runs inside a boundary: a cap on discrete worker actions and
//! wall-clock time, plus an autonomy level the worker is told to honor.
//! Limits come from a profile table keyed by step category, with a default
//! fallback entry, and are enforced live by a [`BoundaryMonitor`] that the
//! dispatch path consults after every action event.
//!
//! A breached boundary is a forced-completion trigger, not an error: the
//! step may still have produced usable partial output.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::plan::{Step, StepCategory};

/// Worker identity that always gets the tightest content-generation
/// boundary, regardless of the category table.
pub const IMAGE_WORKER_ID: &str = "image-generator";

/// How much latitude the worker has inside its boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Every action is subject to review; used for one-shot steps.
    Supervised,
    /// Free to act, expected to report at milestones.
    Guided,
    /// Free to act within the action and time budget.
    Autonomous,
}

/// Resource limits handed to a worker alongside its instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryProfile {
    /// Maximum number of discrete actions before forced completion.
    pub max_actions: u32,
    /// Wall-clock budget for the whole step attempt, in seconds.
    pub time_budget_secs: u64,
    /// Latitude the worker is granted within those caps.
    pub autonomy: AutonomyLevel,
}

impl BoundaryProfile {
    pub fn new(max_actions: u32, time_budget_secs: u64, autonomy: AutonomyLevel) -> Self {
        Self {
            max_actions,
            time_budget_secs,
            autonomy,
        }
    }

    /// The time budget as a `Duration`, for timeout enforcement.
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }
}

impl Default for BoundaryProfile {
    fn default() -> Self {
        Self {
            max_actions: 5,
            time_budget_secs: 300,
            autonomy: AutonomyLevel::Guided,
        }
    }
}

/// Supplies per-step limits from a profile table keyed by category.
#[derive(Debug, Clone)]
pub struct BoundaryController {
    profiles: HashMap<StepCategory, BoundaryProfile>,
    fallback: BoundaryProfile,
}

impl Default for BoundaryController {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            StepCategory::InformationGathering,
            BoundaryProfile::new(4, 180, AutonomyLevel::Autonomous),
        );
        profiles.insert(
            StepCategory::ContentGeneration,
            BoundaryProfile::new(2, 180, AutonomyLevel::Guided),
        );
        profiles.insert(
            StepCategory::DocumentAssembly,
            BoundaryProfile::new(2, 180, AutonomyLevel::Guided),
        );
        profiles.insert(
            StepCategory::FormatConversion,
            BoundaryProfile::new(3, 120, AutonomyLevel::Guided),
        );
        profiles.insert(
            StepCategory::FileOperation,
            BoundaryProfile::new(3, 120, AutonomyLevel::Guided),
        );
        profiles.insert(
            StepCategory::CodeExecution,
            BoundaryProfile::new(5, 300, AutonomyLevel::Supervised),
        );
        Self {
            profiles,
            fallback: BoundaryProfile::default(),
        }
    }
}

impl BoundaryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the profile for one category.
    pub fn set_profile(&mut self, category: StepCategory, profile: BoundaryProfile) {
        self.profiles.insert(category, profile);
    }

    /// Limits for a step category, falling back to the default entry.
    pub fn limits_for(&self, category: StepCategory) -> BoundaryProfile {
        self.profiles.get(&category).copied().unwrap_or(self.fallback)
    }

    /// Limits for a concrete step.
    ///
    /// Image generation is a single expensive action; when the step is
    /// assigned to the image worker the category profile is tightened to
    /// one action under supervision.
    pub fn limits_for_step(&self, step: &Step) -> BoundaryProfile {
        if step.assigned_worker.as_deref() == Some(IMAGE_WORKER_ID) {
            return BoundaryProfile::new(1, 60, AutonomyLevel::Supervised);
        }
        self.limits_for(step.category)
    }
}

/// Outcome of a boundary check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryVerdict {
    /// Still inside the boundary.
    Within,
    /// The action cap has been consumed.
    ActionLimitReached,
    /// The wall-clock budget has run out.
    TimeBudgetExhausted,
}

impl BoundaryVerdict {
    pub fn is_breach(&self) -> bool {
        !matches!(self, Self::Within)
    }
}

/// Live enforcement of one step attempt's boundary.
///
/// Created when the step is dispatched; the dispatch path calls
/// [`BoundaryMonitor::record_action`] for every action event it consumes.
#[derive(Debug)]
pub struct BoundaryMonitor {
    profile: BoundaryProfile,
    started: Instant,
    actions_taken: u32,
}

impl BoundaryMonitor {
    pub fn start(profile: BoundaryProfile) -> Self {
        Self {
            profile,
            started: Instant::now(),
            actions_taken: 0,
        }
    }

    /// Count one worker action and re-check the boundary.
    pub fn record_action(&mut self) -> BoundaryVerdict {
        self.actions_taken += 1;
        self.check()
    }

    /// Check the boundary without consuming an action.
    pub fn check(&self) -> BoundaryVerdict {
        if self.actions_taken >= self.profile.max_actions {
            return BoundaryVerdict::ActionLimitReached;
        }
        if self.started.elapsed() >= self.profile.time_budget() {
            return BoundaryVerdict::TimeBudgetExhausted;
        }
        BoundaryVerdict::Within
    }

    pub fn actions_taken(&self) -> u32 {
        self.actions_taken
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Fraction of the time budget already used, clamped to 1.0.
    pub fn time_used_fraction(&self) -> f64 {
        let budget = self.profile.time_budget().as_secs_f64();
        if budget <= 0.0 {
            return 1.0;
        }
        (self.elapsed().as_secs_f64() / budget).min(1.0)
    }

    /// Human-readable description of a breach, for evidence strings.
    pub fn describe(&self, verdict: BoundaryVerdict) -> String {
        match verdict {
            BoundaryVerdict::Within => "within boundary".to_string(),
            BoundaryVerdict::ActionLimitReached => format!(
                "action limit reached ({} of {} actions used)",
                self.actions_taken, self.profile.max_actions
            ),
            BoundaryVerdict::TimeBudgetExhausted => format!(
                "time budget exhausted ({}s of {}s used)",
                self.elapsed().as_secs(),
                self.profile.time_budget_secs
            ),
        }
    }
}
