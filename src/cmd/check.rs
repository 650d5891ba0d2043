//! Plan validation and allocation preview — `conductor check`.

use anyhow::Result;
use std::path::Path;

/// Parse the plan, preview worker allocation per step, print the
/// boundary table, and surface every non-fatal warning. Structural
/// problems in the plan file are errors and abort the command.
pub fn cmd_check(project_dir: &Path, plan_file: Option<&Path>) -> Result<()> {
    use conductor::allocation::{AgentAllocator, PreviousAllocation};
    use conductor::config::Config;
    use conductor::plan::{StepCategory, lint_plan, load_plan_file};

    let config = Config::new(
        project_dir.to_path_buf(),
        false,
        false,
        plan_file.map(Path::to_path_buf),
    )?;
    let plan = load_plan_file(&config.plan_file)?;

    println!();
    println!("Plan: {}", config.plan_file.display());
    println!("Task: {}", plan.task);
    println!();

    // Allocation preview
    let allocator = AgentAllocator::default();
    let floor = config.toml().allocation.confidence_floor;
    println!(
        "{:<6} {:<24} {:<16} {:<12} Title",
        "Step", "Category", "Worker", "Confidence"
    );
    println!(
        "{:<6} {:<24} {:<16} {:<12} -----",
        "------", "------------------------", "----------------", "----------"
    );

    let mut previous: Option<PreviousAllocation> = None;
    for step in &plan.steps {
        let decision = allocator.allocate(step, previous.as_ref());
        let confidence = if decision.is_confident(floor) {
            format!("{:.2}", decision.confidence)
        } else {
            format!("{:.2} (low)", decision.confidence)
        };
        println!(
            "{:<6} {:<24} {:<16} {:<12} {}",
            step.index, step.category, decision.worker_id, confidence, step.title
        );
        previous = Some(PreviousAllocation {
            category: step.category,
            worker_id: decision.worker_id,
        });
    }
    println!();

    // Boundary table for the categories this plan actually uses
    let (boundaries, boundary_warnings) = config.toml().boundary_controller();
    let mut used: Vec<StepCategory> = plan.steps.iter().map(|s| s.category).collect();
    used.sort_by_key(|c| c.as_str());
    used.dedup();

    println!("{:<24} {:<12} {:<12} Autonomy", "Category", "Actions", "Time");
    for category in used {
        let profile = boundaries.limits_for(category);
        println!(
            "{:<24} {:<12} {:<12} {:?}",
            category.to_string(),
            profile.max_actions,
            format!("{}s", profile.time_budget_secs),
            profile.autonomy
        );
    }
    println!();

    // Warnings are advisory; the command still succeeds.
    let mut warnings = lint_plan(&plan);
    warnings.extend(config.toml().validate());
    warnings.extend(boundary_warnings);

    if warnings.is_empty() {
        println!("Plan is valid.");
    } else {
        println!("Warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();

    Ok(())
}
