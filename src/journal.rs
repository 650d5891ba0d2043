//! Run journal: a persistent evidence trail for each plan execution.
//!
//! The journal mirrors the event stream to disk as it happens, so a
//! crashed run leaves a readable `current-run.json` behind. Finished
//! runs are archived under `runs/` with a timestamped filename.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::execution::{ExecutionEvent, ExecutionReport};
use crate::plan::Plan;

/// One timestamped event in a run's journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ExecutionEvent,
}

/// The full evidence trail of one plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJournal {
    pub run_id: Uuid,
    pub plan_id: Uuid,
    pub task: String,
    /// Fingerprint of the plan this run executed, for matching a journal
    /// back to a plan file after the fact.
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub entries: Vec<JournalEntry>,
    /// Final report, once the run finished.
    #[serde(default)]
    pub summary: Option<ExecutionReport>,
}

impl RunJournal {
    pub fn new(plan: &Plan) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plan_id: plan.id,
            task: plan.task.clone(),
            fingerprint: plan.fingerprint(),
            started_at: Utc::now(),
            ended_at: None,
            entries: Vec::new(),
            summary: None,
        }
    }

    pub fn finish(&mut self, report: &ExecutionReport) {
        self.ended_at = Some(Utc::now());
        self.summary = Some(report.clone());
    }
}

/// Writes run journals under a journal directory.
///
/// Layout: `current-run.json` for the active run, archived runs under
/// `runs/<timestamp>_<id>.json`.
pub struct JournalWriter {
    journal_dir: PathBuf,
    current: Option<RunJournal>,
    current_file: PathBuf,
}

impl JournalWriter {
    pub fn new(journal_dir: &Path) -> Self {
        let current_file = journal_dir.join("current-run.json");
        Self {
            journal_dir: journal_dir.to_path_buf(),
            current: None,
            current_file,
        }
    }

    /// Begin journaling a new run.
    pub fn start_run(&mut self, plan: &Plan) -> Result<()> {
        fs::create_dir_all(self.journal_dir.join("runs"))
            .context("Failed to create journal directories")?;
        self.current = Some(RunJournal::new(plan));
        self.save_current()
    }

    /// Append an event to the active run.
    ///
    /// Returns an error if no run is active, so a caller that forgot
    /// `start_run` cannot silently lose evidence.
    pub fn record(&mut self, event: &ExecutionEvent) -> Result<()> {
        let run = self
            .current
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("record called with no active run"))?;
        run.entries.push(JournalEntry {
            at: Utc::now(),
            event: event.clone(),
        });
        self.save_current()
    }

    /// Close the active run, archive it, and return the archive path.
    pub fn finish_run(&mut self, report: &ExecutionReport) -> Result<PathBuf> {
        let run = self
            .current
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;
        run.finish(report);

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        );
        let run_file = self.journal_dir.join("runs").join(&filename);
        let json = serde_json::to_string_pretty(&run).context("Failed to serialize run journal")?;
        fs::write(&run_file, json).context("Failed to write run journal file")?;

        if self.current_file.exists() {
            fs::remove_file(&self.current_file)
                .context("Failed to remove current-run.json after finishing run")?;
        }
        self.current = None;
        Ok(run_file)
    }

    pub fn save_current(&self) -> Result<()> {
        if let Some(ref run) = self.current {
            let json =
                serde_json::to_string_pretty(&run).context("Failed to serialize current run")?;
            fs::write(&self.current_file, json).context("Failed to write current run file")?;
        }
        Ok(())
    }

    /// Load a leftover `current-run.json`, if one exists.
    pub fn load_current(&mut self) -> Result<bool> {
        if self.current_file.exists() {
            let content = fs::read_to_string(&self.current_file)
                .context("Failed to read current run file")?;
            let run: RunJournal =
                serde_json::from_str(&content).context("Failed to parse current run file")?;
            self.current = Some(run);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn current_run(&self) -> Option<&RunJournal> {
        self.current.as_ref()
    }

    /// Archived run files, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.journal_dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<RunJournal> {
        let content = fs::read_to_string(path).context("Failed to read run journal file")?;
        let run: RunJournal =
            serde_json::from_str(&content).context("Failed to parse run journal file")?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Step, StepCategory};
    use tempfile::TempDir;

    fn setup_writer() -> (JournalWriter, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let writer = JournalWriter::new(dir.path());
        (writer, dir)
    }

    fn sample_plan() -> Plan {
        Plan::new(
            "Collect vendor prices",
            vec![Step::new(
                0,
                "Collect",
                "Collect the vendor pricing data",
                StepCategory::InformationGathering,
            )],
        )
    }

    fn sample_report(plan: &Plan) -> ExecutionReport {
        ExecutionReport {
            plan_id: plan.id,
            success: true,
            completed: 1,
            failed: 0,
            skipped: 0,
            forced: 0,
            aborted: None,
        }
    }

    #[test]
    fn test_record_without_active_run_returns_err() {
        let (mut writer, _dir) = setup_writer();
        let plan = sample_plan();
        let event = ExecutionEvent::PlanStarted {
            plan_id: plan.id,
            task: plan.task.clone(),
            steps: 1,
        };
        assert!(writer.record(&event).is_err());
    }

    #[test]
    fn test_start_record_finish_archives_the_run() {
        let (mut writer, dir) = setup_writer();
        let plan = sample_plan();
        writer.start_run(&plan).unwrap();
        writer
            .record(&ExecutionEvent::StepStarted {
                step_index: 0,
                title: "Collect".to_string(),
                worker: "browser".to_string(),
                attempt: 1,
            })
            .unwrap();

        assert!(dir.path().join("current-run.json").exists());

        let run_file = writer.finish_run(&sample_report(&plan)).unwrap();
        assert!(run_file.exists());
        assert!(run_file.starts_with(dir.path().join("runs")));
        assert!(!dir.path().join("current-run.json").exists());
        assert!(writer.current_run().is_none());
    }

    #[test]
    fn test_crashed_run_is_recoverable_from_current_file() {
        let (mut writer, dir) = setup_writer();
        let plan = sample_plan();
        writer.start_run(&plan).unwrap();
        writer
            .record(&ExecutionEvent::StepStarted {
                step_index: 0,
                title: "Collect".to_string(),
                worker: "browser".to_string(),
                attempt: 1,
            })
            .unwrap();
        writer
            .record(&ExecutionEvent::StepRetrying {
                step_index: 0,
                attempt: 1,
                reason: "generic deflection".to_string(),
            })
            .unwrap();

        // A fresh writer over the same directory sees the leftovers.
        let mut recovered = JournalWriter::new(dir.path());
        assert!(recovered.load_current().unwrap());
        let run = recovered.current_run().unwrap();
        assert_eq!(run.entries.len(), 2);
        assert_eq!(run.task, "Collect vendor prices");
        assert!(run.summary.is_none());
    }

    #[test]
    fn test_archived_run_round_trips_summary_and_events() {
        let (mut writer, _dir) = setup_writer();
        let plan = sample_plan();
        writer.start_run(&plan).unwrap();
        writer
            .record(&ExecutionEvent::StepCompleted {
                step_index: 0,
                kind: crate::plan::CompletionKind::Fallback,
                quality: 0.55,
                evidence: "forced after loop".to_string(),
            })
            .unwrap();
        let run_file = writer.finish_run(&sample_report(&plan)).unwrap();

        let run = writer.load_run(&run_file).unwrap();
        assert_eq!(run.entries.len(), 1);
        assert_eq!(run.fingerprint, plan.fingerprint());
        assert!(run.ended_at.is_some());
        let summary = run.summary.expect("summary must be archived");
        assert!(summary.success);
        assert_eq!(summary.completed, 1);
        match &run.entries[0].event {
            ExecutionEvent::StepCompleted { kind, .. } => {
                assert_eq!(*kind, crate::plan::CompletionKind::Fallback);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_list_runs_finds_archived_files() {
        let (mut writer, _dir) = setup_writer();
        let plan = sample_plan();
        writer.start_run(&plan).unwrap();
        writer.finish_run(&sample_report(&plan)).unwrap();

        let runs = writer.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].extension().map(|ext| ext == "json").unwrap_or(false));
    }
}
