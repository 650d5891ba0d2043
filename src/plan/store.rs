//! In-memory store for the active plan and its execution records.
//!
//! One `PlanStore` exists per running plan. It owns the single shared
//! hazard of the engine: the current step index, which only ever moves
//! through [`PlanStore::try_advance`] (compare-and-set, one increment per
//! completed step).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::StoreError;
use crate::plan::types::{Plan, Step, StepDescriptor, StepExecutionRecord, StepStatus};

/// Serializable snapshot of a store, used by the storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanState {
    /// The plan being executed.
    pub plan: Plan,
    /// Records for steps that have been dispatched at least once.
    pub records: BTreeMap<usize, StepExecutionRecord>,
    /// Index of the step the engine is currently looking at.
    pub current_step_index: usize,
    /// Plan fingerprint captured when execution started.
    pub fingerprint: String,
}

/// Holds the ordered steps of the active plan and their mutable
/// execution records.
#[derive(Debug)]
pub struct PlanStore {
    plan: Plan,
    records: BTreeMap<usize, StepExecutionRecord>,
    current: AtomicUsize,
    fingerprint: String,
}

impl PlanStore {
    /// Create a store for a freshly accepted plan.
    pub fn new(plan: Plan) -> Self {
        let fingerprint = plan.fingerprint();
        Self {
            plan,
            records: BTreeMap::new(),
            current: AtomicUsize::new(0),
            fingerprint,
        }
    }

    /// Rebuild a store from a persisted snapshot.
    ///
    /// Fails with [`StoreError::FingerprintMismatch`] when the plan content
    /// no longer matches the fingerprint captured at execution start —
    /// the signal that something outside the engine edited the plan.
    pub fn from_state(state: PlanState) -> Result<Self, StoreError> {
        let actual = state.plan.fingerprint();
        if actual != state.fingerprint {
            return Err(StoreError::FingerprintMismatch {
                stored: state.fingerprint,
                actual,
            });
        }
        Ok(Self {
            plan: state.plan,
            records: state.records,
            current: AtomicUsize::new(state.current_step_index),
            fingerprint: state.fingerprint,
        })
    }

    /// Snapshot the store for persistence.
    pub fn snapshot(&self) -> PlanState {
        PlanState {
            plan: self.plan.clone(),
            records: self.records.clone(),
            current_step_index: self.current_step_index(),
            fingerprint: self.fingerprint.clone(),
        }
    }

    /// The plan under execution.
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Fingerprint captured when execution started.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Index of the step the engine is currently looking at.
    pub fn current_step_index(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Whether every step index has been passed.
    pub fn is_complete(&self) -> bool {
        self.current_step_index() >= self.plan.len()
    }

    /// The step at the current index, if the plan is not yet complete.
    pub fn current_step(&self) -> Option<&Step> {
        self.plan.step(self.current_step_index())
    }

    /// Advance the current index by one, but only if it still equals
    /// `from_index`. Returns `false` when another path already advanced —
    /// the caller must treat that as "step already done", not an error.
    ///
    /// This is the only place the index moves forward.
    pub fn try_advance(&self, from_index: usize) -> bool {
        self.current
            .compare_exchange(from_index, from_index + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// The record for a step, if it has been dispatched.
    pub fn record(&self, index: usize) -> Option<&StepExecutionRecord> {
        self.records.get(&index)
    }

    /// The record for a step, creating it on first dispatch.
    pub fn ensure_record(&mut self, index: usize) -> Result<&mut StepExecutionRecord, StoreError> {
        if index >= self.plan.len() {
            return Err(StoreError::StepOutOfRange {
                index,
                len: self.plan.len(),
            });
        }
        Ok(self
            .records
            .entry(index)
            .or_insert_with(|| StepExecutionRecord::new(index)))
    }

    /// Mutable access to an existing record.
    pub fn record_mut(&mut self, index: usize) -> Option<&mut StepExecutionRecord> {
        self.records.get_mut(&index)
    }

    /// All records in step order.
    pub fn records(&self) -> impl Iterator<Item = &StepExecutionRecord> {
        self.records.values()
    }

    /// Number of records currently `in_progress`. The engine keeps this at
    /// most 1; anything else is a bug worth surfacing in tests.
    pub fn in_progress_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.status == StepStatus::InProgress)
            .count()
    }

    /// Assign a worker identity to a step.
    pub fn assign_worker(&mut self, index: usize, worker: &str) -> Result<(), StoreError> {
        let len = self.plan.len();
        match self.plan.steps.get_mut(index) {
            Some(step) => {
                step.assigned_worker = Some(worker.to_string());
                Ok(())
            }
            None => Err(StoreError::StepOutOfRange { index, len }),
        }
    }

    /// Apply a re-plan: replace every step from `from_index` onward with
    /// the new descriptors, drop their stale records, and refresh the
    /// fingerprint so the edited plan is not mistaken for external
    /// tampering. Steps before `from_index` keep their indices and
    /// records.
    pub fn apply_replan(
        &mut self,
        from_index: usize,
        descriptors: Vec<StepDescriptor>,
    ) -> Result<(), StoreError> {
        if from_index > self.plan.len() {
            return Err(StoreError::StepOutOfRange {
                index: from_index,
                len: self.plan.len(),
            });
        }
        self.plan.splice_remaining(from_index, descriptors);
        self.records.retain(|idx, _| *idx < from_index);
        self.fingerprint = self.plan.fingerprint();
        Ok(())
    }

    /// Verify the plan content still matches the stored fingerprint.
    pub fn verify_fingerprint(&self) -> Result<(), StoreError> {
        let actual = self.plan.fingerprint();
        if actual != self.fingerprint {
            return Err(StoreError::FingerprintMismatch {
                stored: self.fingerprint.clone(),
                actual,
            });
        }
        Ok(())
    }
}
