use anyhow::{Context, Result, anyhow};
use glob::glob;
use std::path::PathBuf;

use crate::conductor_config::ConductorToml;

/// Runtime configuration for Conductor.
///
/// Bridges the `.conductor/conductor.toml` settings with the paths the
/// engine needs at runtime. Handles plan file discovery and lays out the
/// `.conductor/` working tree.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub plan_file: PathBuf,
    pub conductor_dir: PathBuf,
    pub journal_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
    pub verbose: bool,
    /// Resolve escalations automatically instead of prompting.
    pub no_input: bool,
    /// The underlying unified configuration.
    toml: ConductorToml,
}

impl Config {
    pub fn new(
        project_dir: PathBuf,
        verbose: bool,
        no_input: bool,
        plan_file: Option<PathBuf>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let conductor_dir = project_dir.join(".conductor");
        let toml = ConductorToml::load_or_default(&conductor_dir)?;

        let plan_file = match plan_file {
            Some(path) => path
                .canonicalize()
                .context("Failed to resolve plan file path")?,
            None => Self::find_plan_file(&project_dir)?,
        };
        let journal_dir = conductor_dir.join("journal");
        let log_dir = conductor_dir.join("logs");
        let state_dir = conductor_dir.join("state");

        Ok(Self {
            project_dir,
            plan_file,
            conductor_dir,
            journal_dir,
            log_dir,
            state_dir,
            verbose,
            no_input,
            toml,
        })
    }

    pub fn toml(&self) -> &ConductorToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.journal_dir)
            .context("Failed to create journal directory")?;
        std::fs::create_dir_all(self.journal_dir.join("runs"))
            .context("Failed to create runs directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        Ok(())
    }

    /// Find a plan file, checking .conductor/plan.json first, then
    /// plans/*.{json,yaml}. Returns the most recently modified file if
    /// several are found under plans/.
    fn find_plan_file(project_dir: &PathBuf) -> Result<PathBuf> {
        let default_plan = project_dir.join(".conductor/plan.json");
        if default_plan.exists() {
            return Ok(default_plan);
        }

        let mut plan_files: Vec<PathBuf> = Vec::new();
        for pattern in ["plans/*.json", "plans/*.yaml", "plans/*.yml"] {
            let pattern = project_dir.join(pattern).to_string_lossy().to_string();
            plan_files.extend(
                glob(&pattern)
                    .context("Failed to read glob pattern")?
                    .filter_map(|entry| entry.ok()),
            );
        }

        if plan_files.is_empty() {
            return Err(anyhow!(
                "No plan file found. Create .conductor/plan.json or provide --plan-file"
            ));
        }

        // Sort by modification time (most recent first)
        plan_files.sort_by(|a, b| {
            let a_time = a.metadata().and_then(|m| m.modified()).ok();
            let b_time = b.metadata().and_then(|m| m.modified()).ok();
            b_time.cmp(&a_time)
        });

        Ok(plan_files.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_plan_file(dir: &std::path::Path) -> PathBuf {
        let plans_dir = dir.join("plans");
        fs::create_dir_all(&plans_dir).unwrap();
        let plan_file = plans_dir.join("research.json");
        fs::write(&plan_file, "{}").unwrap();
        plan_file
    }

    #[test]
    fn test_config_new_with_explicit_plan() {
        let dir = tempdir().unwrap();
        let plan_file = setup_plan_file(dir.path());
        let config =
            Config::new(dir.path().to_path_buf(), true, false, Some(plan_file.clone())).unwrap();
        assert!(config.verbose);
        assert!(!config.no_input);
        assert_eq!(config.plan_file, plan_file.canonicalize().unwrap());
        assert_eq!(
            config.journal_dir,
            dir.path()
                .canonicalize()
                .unwrap()
                .join(".conductor/journal")
        );
    }

    #[test]
    fn test_config_state_dir_in_conductor_directory() {
        let dir = tempdir().unwrap();
        let plan_file = setup_plan_file(dir.path());
        let config = Config::new(dir.path().to_path_buf(), false, false, Some(plan_file)).unwrap();
        assert_eq!(
            config.state_dir,
            dir.path().canonicalize().unwrap().join(".conductor/state")
        );
    }

    #[test]
    fn test_config_new_with_auto_discovery() {
        let dir = tempdir().unwrap();
        let plan_file = setup_plan_file(dir.path());
        let config = Config::new(dir.path().to_path_buf(), true, false, None).unwrap();
        assert_eq!(config.plan_file, plan_file.canonicalize().unwrap());
    }

    #[test]
    fn test_config_prefers_conductor_plan_json() {
        let dir = tempdir().unwrap();
        setup_plan_file(dir.path());
        let conductor_dir = dir.path().join(".conductor");
        fs::create_dir_all(&conductor_dir).unwrap();
        let default_plan = conductor_dir.join("plan.json");
        fs::write(&default_plan, "{}").unwrap();

        let config = Config::new(dir.path().to_path_buf(), false, false, None).unwrap();
        assert!(config.plan_file.ends_with(".conductor/plan.json"));
    }

    #[test]
    fn test_config_new_no_plan_file_error() {
        let dir = tempdir().unwrap();
        let result = Config::new(dir.path().to_path_buf(), true, false, None);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("No plan file found")
        );
    }

    #[test]
    fn test_config_reads_conductor_toml() {
        let dir = tempdir().unwrap();
        let plan_file = setup_plan_file(dir.path());
        let conductor_dir = dir.path().join(".conductor");
        fs::create_dir_all(&conductor_dir).unwrap();
        fs::write(
            conductor_dir.join("conductor.toml"),
            "[execution]\nmax_attempts = 4\n",
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), false, false, Some(plan_file)).unwrap();
        assert_eq!(config.toml().execution.max_attempts, 4);
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let plan_file = setup_plan_file(dir.path());
        let config = Config::new(dir.path().to_path_buf(), false, false, Some(plan_file)).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.journal_dir.exists());
        assert!(config.journal_dir.join("runs").exists());
        assert!(config.log_dir.exists());
        assert!(config.state_dir.exists());
    }
}
