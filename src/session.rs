//! Per-plan execution session.
//!
//! One `ExecutionSession` is created when a plan starts and torn down
//! when it finishes. It carries the run's identity and budgets and is
//! passed explicitly to the components that need them; no orchestration
//! state lives in globals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::plan::Plan;

/// Budgets applied to every step of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBudgets {
    /// Attempts allowed per step before it is marked failed.
    pub max_attempts: u32,
    /// Re-plans allowed before a plan-invalid signal becomes fatal.
    pub max_replans: u32,
    /// Pause between retry attempts.
    pub retry_delay_secs: u64,
    /// Character budget for the context block handed to workers.
    pub context_budget_chars: usize,
}

impl Default for SessionBudgets {
    fn default() -> Self {
        Self {
            // The attempt ceiling sits above the validator's progression
            // tier so adaptive acceptance can engage before hard failure.
            max_attempts: 12,
            max_replans: 2,
            retry_delay_secs: 2,
            context_budget_chars: 2000,
        }
    }
}

impl SessionBudgets {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Identity and lifecycle of one plan execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSession {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub task: String,
    pub budgets: SessionBudgets,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    replans_used: u32,
}

impl ExecutionSession {
    pub fn new(plan: &Plan, budgets: SessionBudgets) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan_id: plan.id,
            task: plan.task.clone(),
            budgets,
            started_at: Utc::now(),
            finished_at: None,
            replans_used: 0,
        }
    }

    pub fn replans_used(&self) -> u32 {
        self.replans_used
    }

    pub fn replans_remaining(&self) -> u32 {
        self.budgets.max_replans.saturating_sub(self.replans_used)
    }

    /// Consume one re-plan from the budget. Returns `false` when the
    /// budget is exhausted and the plan-invalid signal must become fatal.
    pub fn try_consume_replan(&mut self) -> bool {
        if self.replans_used >= self.budgets.max_replans {
            return false;
        }
        self.replans_used += 1;
        true
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
