//! Effective profile tables — `conductor profiles`.

use anyhow::Result;
use std::path::Path;

/// Print the boundary profiles and worker capability profiles after the
/// config overrides have been applied.
pub fn cmd_profiles(project_dir: &Path) -> Result<()> {
    use conductor::allocation::AgentAllocator;
    use conductor::conductor_config::ConductorToml;
    use conductor::plan::StepCategory;

    let conductor_dir = project_dir.join(".conductor");
    let toml = ConductorToml::load_or_default(&conductor_dir)?;
    let (boundaries, warnings) = toml.boundary_controller();

    println!();
    println!("Boundary Profiles");
    println!("=================");
    println!();
    println!(
        "{:<24} {:<12} {:<12} Autonomy",
        "Category", "Actions", "Time"
    );
    for category in StepCategory::all() {
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

    println!("Worker Capabilities");
    println!("===================");
    println!();
    for profile in AgentAllocator::default().profiles() {
        println!(
            "{} (priority {})",
            console::style(&profile.worker_id).bold(),
            profile.priority
        );
        let categories: Vec<String> = profile.categories.iter().map(|c| c.to_string()).collect();
        println!("  categories: {}", categories.join(", "));
        println!("  affinity:   {}", profile.affinity.join(", "));
        println!(
            "  boundary:   {} actions / {}s, {:?}",
            profile.boundary.max_actions, profile.boundary.time_budget_secs, profile.autonomy
        );
        println!();
    }

    println!(
        "Allocation confidence floor: {:.2}",
        toml.allocation.confidence_floor
    );
    println!();

    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
        println!();
    }

    Ok(())
}
