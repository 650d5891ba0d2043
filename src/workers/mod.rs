//! Worker contract and implementations.
//!
//! A worker receives one step attempt (instruction, curated context,
//! boundary limits) and streams back events: any number of discrete
//! actions, then exactly one final response. The engine counts the
//! actions against the boundary and feeds them to loop detection; only
//! the final response reaches completion validation.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::boundary::BoundaryProfile;
use crate::loops::ActionRecord;
use crate::plan::WorkerResponse;

mod registry;
mod scripted;

pub use registry::WorkerRegistry;
pub use scripted::{ScriptedAction, ScriptedReply, ScriptedWorker};

/// Everything a worker needs to execute one step attempt.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Index of the step being executed.
    pub step_index: usize,
    /// The step instruction, possibly refined on retries.
    pub instruction: String,
    /// Curated context from earlier steps; empty on the first step.
    pub context: String,
    /// Limits the worker is expected to honor.
    pub limits: BoundaryProfile,
    /// 1-based attempt number for this step.
    pub attempt: u32,
}

/// Events emitted by a worker during one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// A discrete action taken while working the step.
    Action { action: ActionRecord },
    /// The terminal response for this dispatch; nothing follows it.
    Final { response: WorkerResponse },
}

/// Abstraction over step execution for testability.
/// Real implementations wrap external capabilities; test double:
/// `ScriptedWorker`.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Worker identity, as used by allocation and step assignment.
    fn id(&self) -> &str;

    /// Execute one step attempt. The returned channel yields action
    /// events followed by one final response, then closes. Errors here
    /// mean the worker could not start at all (unavailable), not that
    /// the step failed.
    async fn dispatch(&self, request: DispatchRequest) -> Result<mpsc::Receiver<WorkerEvent>>;
}
