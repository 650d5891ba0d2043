//! Unified configuration for Conductor.
//!
//! Reads `.conductor/conductor.toml` and maps each section onto the
//! engine's own config types. Every section and every field is optional;
//! a missing file yields the built-in defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "quarterly-report"
//!
//! [execution]
//! max_attempts = 12
//! max_replans = 2
//! retry_delay_secs = 2
//! context_budget_chars = 2000
//!
//! [validation]
//! min_response_chars = 50
//! confidence_threshold = 0.7
//! relevance_threshold = 0.1
//! adaptation_attempts = 5
//! progression_attempts = 10
//!
//! [loops]
//! max_repeats = 1
//! max_target_visits = 3
//!
//! [allocation]
//! confidence_floor = 0.4
//!
//! [boundaries.overrides."information-gathering"]
//! max_actions = 6
//! time_budget_secs = 240
//!
//! [boundaries.overrides."code-execution"]
//! autonomy = "supervised"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::boundary::{AutonomyLevel, BoundaryController};
use crate::loops::LoopConfig;
use crate::plan::StepCategory;
use crate::session::SessionBudgets;
use crate::validation::ValidationConfig;

/// Project-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Display name for the project.
    pub name: Option<String>,
}

/// Step execution budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_replans")]
    pub max_replans: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
}

fn default_max_attempts() -> u32 {
    12
}

fn default_max_replans() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_context_budget_chars() -> usize {
    2000
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_replans: default_max_replans(),
            retry_delay_secs: default_retry_delay_secs(),
            context_budget_chars: default_context_budget_chars(),
        }
    }
}

impl ExecutionSection {
    pub fn to_budgets(&self) -> SessionBudgets {
        SessionBudgets {
            max_attempts: self.max_attempts,
            max_replans: self.max_replans,
            retry_delay_secs: self.retry_delay_secs,
            context_budget_chars: self.context_budget_chars,
        }
    }
}

/// Completion validation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSection {
    #[serde(default = "default_min_response_chars")]
    pub min_response_chars: usize,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    #[serde(default = "default_adaptation_attempts")]
    pub adaptation_attempts: u32,
    #[serde(default = "default_progression_attempts")]
    pub progression_attempts: u32,
    #[serde(default)]
    pub semantic_check: bool,
}

fn default_min_response_chars() -> usize {
    50
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_relevance_threshold() -> f64 {
    0.1
}

fn default_adaptation_attempts() -> u32 {
    5
}

fn default_progression_attempts() -> u32 {
    10
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            min_response_chars: default_min_response_chars(),
            confidence_threshold: default_confidence_threshold(),
            relevance_threshold: default_relevance_threshold(),
            adaptation_attempts: default_adaptation_attempts(),
            progression_attempts: default_progression_attempts(),
            semantic_check: false,
        }
    }
}

impl ValidationSection {
    pub fn to_validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            min_response_chars: self.min_response_chars,
            confidence_threshold: self.confidence_threshold,
            relevance_threshold: self.relevance_threshold,
            adaptation_attempts: self.adaptation_attempts,
            progression_attempts: self.progression_attempts,
            semantic_check: self.semantic_check,
        }
    }
}

/// Loop detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopsSection {
    #[serde(default = "default_max_repeats")]
    pub max_repeats: usize,
    #[serde(default = "default_stale_window")]
    pub stale_window: usize,
    #[serde(default = "default_nav_cycle_window")]
    pub nav_cycle_window: usize,
    #[serde(default = "default_nav_cycle_min_navigations")]
    pub nav_cycle_min_navigations: usize,
    #[serde(default = "default_nav_cycle_max_targets")]
    pub nav_cycle_max_targets: usize,
    #[serde(default = "default_max_target_visits")]
    pub max_target_visits: usize,
}

fn default_max_repeats() -> usize {
    1
}

fn default_stale_window() -> usize {
    5
}

fn default_nav_cycle_window() -> usize {
    4
}

fn default_nav_cycle_min_navigations() -> usize {
    3
}

fn default_nav_cycle_max_targets() -> usize {
    2
}

fn default_max_target_visits() -> usize {
    3
}

impl Default for LoopsSection {
    fn default() -> Self {
        Self {
            max_repeats: default_max_repeats(),
            stale_window: default_stale_window(),
            nav_cycle_window: default_nav_cycle_window(),
            nav_cycle_min_navigations: default_nav_cycle_min_navigations(),
            nav_cycle_max_targets: default_nav_cycle_max_targets(),
            max_target_visits: default_max_target_visits(),
        }
    }
}

impl LoopsSection {
    pub fn to_loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_repeats: self.max_repeats,
            stale_window: self.stale_window,
            nav_cycle_window: self.nav_cycle_window,
            nav_cycle_min_navigations: self.nav_cycle_min_navigations,
            nav_cycle_max_targets: self.nav_cycle_max_targets,
            max_target_visits: self.max_target_visits,
        }
    }
}

/// Worker allocation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSection {
    /// Allocations below this confidence escalate to the human.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
}

fn default_confidence_floor() -> f64 {
    0.4
}

impl Default for AllocationSection {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
        }
    }
}

/// Per-category boundary overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundariesSection {
    /// Overrides keyed by step category name (kebab-case).
    #[serde(default)]
    pub overrides: HashMap<String, BoundaryOverride>,
}

/// Partial boundary profile; unset fields keep the built-in value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundaryOverride {
    pub max_actions: Option<u32>,
    pub time_budget_secs: Option<u64>,
    pub autonomy: Option<AutonomyLevel>,
}

/// The `.conductor/conductor.toml` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub loops: LoopsSection,
    #[serde(default)]
    pub allocation: AllocationSection,
    #[serde(default)]
    pub boundaries: BoundariesSection,
}

impl ConductorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conductor.toml")
    }

    /// Load from the default location (`<dir>/conductor.toml`), then from
    /// `~/.conductor/conductor.toml`, falling back to defaults when neither
    /// file exists.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join("conductor.toml");
        if config_path.exists() {
            return Self::load(&config_path);
        }
        if let Some(home) = dirs::home_dir() {
            let global_path = home.join(".conductor").join("conductor.toml");
            if global_path.exists() {
                return Self::load(&global_path);
            }
        }
        Ok(Self::default())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Build the boundary profile table with overrides applied. Unknown
    /// category names are reported, not fatal.
    pub fn boundary_controller(&self) -> (BoundaryController, Vec<String>) {
        let mut controller = BoundaryController::new();
        let mut warnings = Vec::new();
        for (name, override_cfg) in &self.boundaries.overrides {
            match name.parse::<StepCategory>() {
                Ok(category) => {
                    let mut profile = controller.limits_for(category);
                    if let Some(max_actions) = override_cfg.max_actions {
                        profile.max_actions = max_actions;
                    }
                    if let Some(secs) = override_cfg.time_budget_secs {
                        profile.time_budget_secs = secs;
                    }
                    if let Some(autonomy) = override_cfg.autonomy {
                        profile.autonomy = autonomy;
                    }
                    controller.set_profile(category, profile);
                }
                Err(_) => warnings.push(format!(
                    "Unknown step category '{name}' in [boundaries.overrides]"
                )),
            }
        }
        (controller, warnings)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.execution.max_attempts == 0 {
            warnings.push("execution.max_attempts is 0; every step will fail immediately".to_string());
        }
        if self.execution.max_attempts < self.validation.progression_attempts {
            warnings.push(format!(
                "execution.max_attempts ({}) is below validation.progression_attempts ({}); the minimal acceptance tier can never engage",
                self.execution.max_attempts, self.validation.progression_attempts
            ));
        }
        if self.validation.adaptation_attempts >= self.validation.progression_attempts {
            warnings.push(format!(
                "validation.adaptation_attempts ({}) should be below progression_attempts ({})",
                self.validation.adaptation_attempts, self.validation.progression_attempts
            ));
        }
        if !(0.0..=1.0).contains(&self.validation.confidence_threshold) {
            warnings.push(format!(
                "validation.confidence_threshold {} is outside [0, 1]",
                self.validation.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.validation.relevance_threshold) {
            warnings.push(format!(
                "validation.relevance_threshold {} is outside [0, 1]",
                self.validation.relevance_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.allocation.confidence_floor) {
            warnings.push(format!(
                "allocation.confidence_floor {} is outside [0, 1]",
                self.allocation.confidence_floor
            ));
        }
        if self.loops.max_repeats == 0 {
            warnings.push(
                "loops.max_repeats is 0; every action will count as a loop".to_string(),
            );
        }
        for (name, override_cfg) in &self.boundaries.overrides {
            if name.parse::<StepCategory>().is_err() {
                warnings.push(format!(
                    "Unknown step category '{name}' in [boundaries.overrides]"
                ));
            }
            if override_cfg.max_actions == Some(0) {
                warnings.push(format!(
                    "boundaries.overrides.{name}.max_actions is 0; the step can never act"
                ));
            }
        }

        warnings
    }
}
