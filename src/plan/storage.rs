//! Persistence backends for plan execution state.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::plan::store::PlanState;

/// Abstraction over plan state persistence for testability.
/// Real implementation: `JsonFileStorage`. Test double: `MemoryStorage`.
#[async_trait]
pub trait PlanStorage: Send + Sync {
    /// Load the persisted state for a plan, if any exists.
    async fn load(&self, plan_id: Uuid) -> Result<Option<PlanState>, StoreError>;

    /// Persist the full state of a plan, replacing any previous snapshot.
    async fn save(&self, state: &PlanState) -> Result<(), StoreError>;
}

/// Stores each plan as a pretty-printed JSON file under a state directory.
pub struct JsonFileStorage {
    state_dir: PathBuf,
}

impl JsonFileStorage {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
        }
    }

    fn path_for(&self, plan_id: Uuid) -> PathBuf {
        self.state_dir.join(format!("{plan_id}.json"))
    }
}

#[async_trait]
impl PlanStorage for JsonFileStorage {
    async fn load(&self, plan_id: Uuid) -> Result<Option<PlanState>, StoreError> {
        let path = self.path_for(plan_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StoreError::ReadFailed {
                path: path.clone(),
                source,
            })?;
        let state: PlanState = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    async fn save(&self, state: &PlanState) -> Result<(), StoreError> {
        let path = self.path_for(state.plan.id);
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|source| StoreError::WriteFailed {
                path: self.state_dir.clone(),
                source,
            })?;
        let json = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| StoreError::WriteFailed { path, source })?;
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStorage {
    states: Mutex<HashMap<Uuid, PlanState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStorage for MemoryStorage {
    async fn load(&self, plan_id: Uuid) -> Result<Option<PlanState>, StoreError> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        Ok(states.get(&plan_id).cloned())
    }

    async fn save(&self, state: &PlanState) -> Result<(), StoreError> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.insert(state.plan.id, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::store::PlanStore;
    use crate::plan::types::{Plan, Step, StepCategory};
    use tempfile::TempDir;

    fn sample_state() -> PlanState {
        let plan = Plan::new(
            "persist me",
            vec![Step::new(
                0,
                "Only step",
                "Write the answer to a file on disk",
                StepCategory::FileOperation,
            )],
        );
        PlanStore::new(plan).snapshot()
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let storage = JsonFileStorage::new(dir.path());
        let state = sample_state();
        let plan_id = state.plan.id;

        storage.save(&state).await.unwrap();
        let loaded = storage.load(plan_id).await.unwrap().expect("state must exist");
        assert_eq!(loaded.plan.id, plan_id);
        assert_eq!(loaded.fingerprint, state.fingerprint);
        assert_eq!(loaded.current_step_index, 0);
    }

    #[tokio::test]
    async fn test_json_file_load_missing_returns_none() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let storage = JsonFileStorage::new(dir.path());
        let loaded = storage.load(Uuid::new_v4()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_json_file_save_creates_state_dir() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let nested = dir.path().join("state");
        let storage = JsonFileStorage::new(&nested);
        storage.save(&sample_state()).await.unwrap();
        assert!(nested.exists());
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let storage = MemoryStorage::new();
        let state = sample_state();
        let plan_id = state.plan.id;

        storage.save(&state).await.unwrap();
        let loaded = storage.load(plan_id).await.unwrap().expect("state must exist");
        assert_eq!(loaded.plan.task, "persist me");
        assert!(storage.load(Uuid::new_v4()).await.unwrap().is_none());
    }
}
