//! Plan file loading and validation.
//!
//! Plans arrive from an external planning capability (language model or
//! human) as an ordered list of step descriptors. This module parses the
//! on-disk representation and performs structural checks before the
//! engine accepts the plan.
//!
//! ## Expected Format
//!
//! ```json
//! {
//!   "task": "Research rust orchestrators and produce a PDF report",
//!   "steps": [
//!     {
//!       "title": "Research",
//!       "instruction": "Find three recent articles about task orchestration",
//!       "category": "information-gathering",
//!       "expected_outcome": "a list of articles with key facts"
//!     }
//!   ]
//! }
//! ```
//!
//! The same shape is accepted as YAML when the file extension is
//! `.yaml`/`.yml`.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::plan::types::{Plan, StepDescriptor};

/// Raw plan file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPlanFile {
    /// The original user task.
    task: String,
    /// Step descriptors in execution order.
    steps: Vec<StepDescriptor>,
}

/// Load a plan from a JSON or YAML file, detected by extension.
pub fn load_plan_file(path: &Path) -> Result<Plan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

    let raw = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_plan_json(&content)?,
        Some("yaml") | Some("yml") => parse_plan_yaml(&content)?,
        other => bail!(
            "Unsupported plan file extension {:?} for {} (expected .json, .yaml, or .yml)",
            other.unwrap_or(""),
            path.display()
        ),
    };

    validate_descriptors(&raw.task, &raw.steps)?;
    Ok(Plan::from_descriptors(&raw.task, raw.steps))
}

/// Parse a JSON plan document.
fn parse_plan_json(content: &str) -> Result<RawPlanFile> {
    serde_json::from_str(content).context("Failed to parse plan JSON")
}

/// Parse a YAML plan document.
fn parse_plan_yaml(content: &str) -> Result<RawPlanFile> {
    serde_yaml::from_str(content).context("Failed to parse plan YAML")
}

/// Structural validation: a plan must have a task and at least one step,
/// and every step needs a title and an instruction.
fn validate_descriptors(task: &str, steps: &[StepDescriptor]) -> Result<()> {
    if task.trim().is_empty() {
        bail!("Plan has an empty task description");
    }
    if steps.is_empty() {
        bail!("Plan has no steps");
    }
    for (i, step) in steps.iter().enumerate() {
        if step.title.trim().is_empty() {
            bail!("Step {} has an empty title", i);
        }
        if step.instruction.trim().is_empty() {
            bail!("Step {} ('{}') has an empty instruction", i, step.title);
        }
    }
    Ok(())
}

/// Non-fatal plan quality warnings, shown by `conductor check`.
pub fn lint_plan(plan: &Plan) -> Vec<String> {
    let mut warnings = Vec::new();

    for step in &plan.steps {
        if step.expected_outcome.is_none() {
            warnings.push(format!(
                "Step {} ('{}') has no expected_outcome; validation falls back to \
                 title/instruction keywords only",
                step.index, step.title
            ));
        }
        if step.instruction.split_whitespace().count() < 3 {
            warnings.push(format!(
                "Step {} ('{}') has a very short instruction; workers tend to deflect \
                 on under-specified steps",
                step.index, step.title
            ));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::StepCategory;
    use std::fs;
    use tempfile::tempdir;

    const PLAN_JSON: &str = r#"{
        "task": "Summarize the quarterly numbers",
        "steps": [
            {
                "title": "Gather",
                "instruction": "Find the quarterly revenue figures on the finance portal",
                "category": "information-gathering"
            },
            {
                "title": "Report",
                "instruction": "Write a one-page summary of the figures",
                "category": "document-assembly",
                "expected_outcome": "summary.md with revenue table"
            }
        ]
    }"#;

    const PLAN_YAML: &str = r#"
task: Summarize the quarterly numbers
steps:
  - title: Gather
    instruction: Find the quarterly revenue figures on the finance portal
    category: information-gathering
  - title: Report
    instruction: Write a one-page summary of the figures
    category: document-assembly
    expected_outcome: summary.md with revenue table
"#;

    #[test]
    fn test_load_json_plan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(&path, PLAN_JSON).unwrap();

        let plan = load_plan_file(&path).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[0].category, StepCategory::InformationGathering);
        assert_eq!(
            plan.steps[1].expected_outcome.as_deref(),
            Some("summary.md with revenue table")
        );
    }

    #[test]
    fn test_load_yaml_plan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        fs::write(&path, PLAN_YAML).unwrap();

        let plan = load_plan_file(&path).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.steps[1].category, StepCategory::DocumentAssembly);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.toml");
        fs::write(&path, "task = 'x'").unwrap();

        let err = load_plan_file(&path).unwrap_err();
        assert!(err.to_string().contains("extension"));
    }

    #[test]
    fn test_load_rejects_empty_steps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(&path, r#"{"task": "do nothing", "steps": []}"#).unwrap();

        let err = load_plan_file(&path).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_load_rejects_empty_instruction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(
            &path,
            r#"{
                "task": "something",
                "steps": [
                    {"title": "A", "instruction": "  ", "category": "code-execution"}
                ]
            }"#,
        )
        .unwrap();

        let err = load_plan_file(&path).unwrap_err();
        assert!(err.to_string().contains("empty instruction"));
    }

    #[test]
    fn test_load_rejects_unknown_category() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(
            &path,
            r#"{
                "task": "something",
                "steps": [
                    {"title": "A", "instruction": "do the thing", "category": "telepathy"}
                ]
            }"#,
        )
        .unwrap();

        assert!(load_plan_file(&path).is_err());
    }

    #[test]
    fn test_lint_flags_missing_expected_outcome() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(&path, PLAN_JSON).unwrap();

        let plan = load_plan_file(&path).unwrap();
        let warnings = lint_plan(&plan);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("expected_outcome"));
        assert!(warnings[0].contains("'Gather'"));
    }
}
