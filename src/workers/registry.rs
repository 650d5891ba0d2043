//! Lookup table from worker identity to implementation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::workers::Worker;

/// Holds the workers available to a run, keyed by identity.
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own identity. Replaces any previous
    /// worker with the same identity.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.id().to_string(), worker);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workers.contains_key(id)
    }

    /// Registered identities, sorted for stable output.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
