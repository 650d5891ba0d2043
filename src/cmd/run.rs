//! Plan execution — `conductor run`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::{Select, theme::ColorfulTheme};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use conductor::execution::{EscalationHandler, EscalationOption, EscalationPrompt};
use conductor::ui::PlanUI;
use conductor::workers::{ScriptedReply, ScriptedWorker, WorkerRegistry};

use super::super::Cli;

/// On-disk shape of a `--script` file: scripted replies per worker,
/// consumed in queue order across dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptFile {
    pub workers: HashMap<String, Vec<ScriptedReply>>,
}

/// Workers available when no script provides them: the four built-in
/// capability identities, each with an empty reply queue.
pub fn default_registry() -> WorkerRegistry {
    use conductor::allocation::built_in_profiles;

    let mut registry = WorkerRegistry::new();
    for profile in built_in_profiles() {
        registry.register(Arc::new(ScriptedWorker::new(&profile.worker_id)));
    }
    registry
}

/// Build the worker registry from a script file, with defaults for any
/// built-in worker the script does not mention.
pub fn load_worker_scripts(path: &Path) -> Result<WorkerRegistry> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))?;

    let script: ScriptFile = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).context("Failed to parse script YAML")?
        }
        _ => serde_json::from_str(&content).context("Failed to parse script JSON")?,
    };

    let mut registry = default_registry();
    for (worker_id, replies) in script.workers {
        registry.register(Arc::new(ScriptedWorker::with_replies(&worker_id, replies)));
    }
    Ok(registry)
}

/// Escalation handler backed by an interactive `dialoguer` select.
///
/// Suspends the progress bars while the prompt owns the terminal.
struct SelectEscalation {
    ui: Arc<PlanUI>,
}

#[async_trait]
impl EscalationHandler for SelectEscalation {
    async fn escalate(&self, prompt: &EscalationPrompt) -> Result<EscalationOption> {
        let labels: Vec<&str> = prompt.options.iter().map(|o| o.label()).collect();
        let reason = prompt.reason.clone();
        let step = prompt.step_index + 1;

        let selection = self.ui.suspend(|| {
            let width = terminal_size::terminal_size()
                .map(|(terminal_size::Width(w), _)| w as usize)
                .unwrap_or(80);
            println!();
            println!(
                "{} Step {} needs a decision:",
                console::style("!").red().bold(),
                step
            );
            for line in textwrap::wrap(&reason, width.saturating_sub(4)) {
                println!("  {}", line);
            }
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("How should the run proceed?")
                .items(&labels)
                .default(0)
                .interact()
        })?;

        Ok(prompt.options[selection])
    }
}

pub async fn run_plan(
    cli: &Cli,
    project_dir: PathBuf,
    script: Option<PathBuf>,
    max_attempts: Option<u32>,
) -> Result<()> {
    use conductor::config::Config;
    use conductor::execution::{AutoEscalation, ExecutionController};
    use conductor::journal::JournalWriter;
    use conductor::loops::LoopDetector;
    use conductor::plan::{JsonFileStorage, lint_plan, load_plan_file};
    use conductor::validation::CompletionValidator;
    use tokio::sync::mpsc;

    let config = Config::new(project_dir, cli.verbose, cli.yes, cli.plan.clone())?;
    config.ensure_directories()?;

    let config_warnings = config.toml().validate();
    if !config_warnings.is_empty() {
        println!("Configuration warnings:");
        for warning in &config_warnings {
            println!("  - {}", warning);
        }
        println!();
    }

    let plan = load_plan_file(&config.plan_file)?;
    if cli.verbose {
        for warning in lint_plan(&plan) {
            println!("  - {}", warning);
        }
    }

    let registry = match &script {
        Some(path) => load_worker_scripts(path)?,
        None => default_registry(),
    };

    let mut budgets = config.toml().execution.to_budgets();
    if let Ok(value) = std::env::var("CONDUCTOR_MAX_ATTEMPTS")
        && let Ok(parsed) = value.parse::<u32>()
    {
        budgets.max_attempts = parsed;
    }
    if let Some(limit) = max_attempts {
        budgets.max_attempts = limit;
    }

    let (boundaries, boundary_warnings) = config.toml().boundary_controller();
    for warning in &boundary_warnings {
        println!("  - {}", warning);
    }

    let ui = Arc::new(PlanUI::new(plan.len() as u64, cli.verbose));

    // Unattended runs resolve every escalation to skip; interactive runs
    // get a select prompt with the step's offered options.
    let escalation: Arc<dyn EscalationHandler> = if cli.yes {
        Arc::new(AutoEscalation::new(EscalationOption::Skip))
    } else {
        Arc::new(SelectEscalation {
            ui: Arc::clone(&ui),
        })
    };

    let mut journal = JournalWriter::new(&config.journal_dir);
    journal.start_run(&plan)?;

    let (tx, mut rx) = mpsc::channel(64);
    let mut controller = ExecutionController::new(plan, registry, escalation)
        .with_budgets(budgets)
        .with_boundaries(boundaries)
        .with_loop_policy(Box::new(LoopDetector::new(
            config.toml().loops.to_loop_config(),
        )))
        .with_completion_policy(Box::new(CompletionValidator::new(
            config.toml().validation.to_validation_config(),
        )))
        .with_allocation_floor(config.toml().allocation.confidence_floor)
        .with_storage(Arc::new(JsonFileStorage::new(&config.state_dir)))
        .with_event_channel(tx);

    // The consumer renders progress and journals every event, then hands
    // the journal back when the channel closes.
    let consumer_ui = Arc::clone(&ui);
    let consumer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            consumer_ui.handle_event(&event);
            if let Err(err) = journal.record(&event) {
                warn!("journal write failed: {err}");
            }
        }
        journal
    });

    let result = controller.run_plan().await;

    // Dropping the controller closes the event channel and lets the
    // consumer finish draining.
    drop(controller);
    let mut journal = consumer.await.context("event consumer task panicked")?;

    let report = result?;
    let journal_path = journal.finish_run(&report)?;
    println!("Journal: {}", journal_path.display());

    if let Some(reason) = &report.aborted {
        anyhow::bail!("{}", reason);
    }
    if !report.success {
        anyhow::bail!(
            "Plan finished with problems: {} completed, {} failed, {} skipped",
            report.completed,
            report.failed,
            report.skipped
        );
    }
    Ok(())
}
