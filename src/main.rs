use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Plan-driven orchestration of multi-agent task execution")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Resolve escalations automatically instead of prompting
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the plan file. If not provided, checks .conductor/plan.json
    /// then the most recent plans/*.{json,yaml}
    #[arg(long, global = true)]
    pub plan: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a plan to completion
    Run {
        /// Scripted worker replies for dry runs and replay
        #[arg(long)]
        script: Option<PathBuf>,

        /// Override the per-step attempt budget
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Validate a plan file and preview worker allocation
    Check,
    /// Print effective boundary and worker capability profiles
    Profiles,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Only `run` writes file logs; the read-only commands stay on stderr.
    let log_dir = project_dir.join(".conductor").join("logs");
    let _guard = match &cli.command {
        Commands::Run { .. } if std::fs::create_dir_all(&log_dir).is_ok() => {
            conductor::logging::init(Some(&log_dir))
        }
        _ => conductor::logging::init(None),
    };

    match &cli.command {
        Commands::Run {
            script,
            max_attempts,
        } => {
            cmd::run_plan(&cli, project_dir, script.clone(), *max_attempts).await?;
        }
        Commands::Check => cmd::cmd_check(&project_dir, cli.plan.as_deref())?,
        Commands::Profiles => cmd::cmd_profiles(&project_dir)?,
    }

    Ok(())
}
