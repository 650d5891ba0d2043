//! Script-driven worker for tests and dry runs.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::loops::{ActionKind, ActionRecord};
use crate::plan::WorkerResponse;
use crate::workers::{DispatchRequest, Worker, WorkerEvent};

/// One scripted action, emitted before the reply's final response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedAction {
    pub kind: ActionKind,
    pub target: String,
}

/// One scripted reply, consumed per dispatch in queue order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedReply {
    /// Actions streamed before the final response.
    #[serde(default)]
    pub actions: Vec<ScriptedAction>,
    /// The final response body.
    pub response: String,
    /// Delay before the final response, to exercise time budgets.
    #[serde(default)]
    pub delay_ms: u64,
    /// Simulate the worker being unreachable for this dispatch.
    #[serde(default)]
    pub unavailable: bool,
}

impl ScriptedReply {
    pub fn text(response: &str) -> Self {
        Self {
            actions: Vec::new(),
            response: response.to_string(),
            delay_ms: 0,
            unavailable: false,
        }
    }

    pub fn with_actions(mut self, actions: Vec<(ActionKind, &str)>) -> Self {
        self.actions = actions
            .into_iter()
            .map(|(kind, target)| ScriptedAction {
                kind,
                target: target.to_string(),
            })
            .collect();
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn unavailable() -> Self {
        Self {
            actions: Vec::new(),
            response: String::new(),
            delay_ms: 0,
            unavailable: true,
        }
    }
}

/// Worker that plays back a queue of scripted replies.
///
/// Every dispatch request is captured so tests can assert on the
/// instruction and context the engine actually sent.
pub struct ScriptedWorker {
    id: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    seen: Mutex<Vec<DispatchRequest>>,
}

impl ScriptedWorker {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            replies: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_replies(id: &str, replies: Vec<ScriptedReply>) -> Self {
        Self {
            id: id.to_string(),
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    pub fn remaining_replies(&self) -> usize {
        self.replies.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Requests received so far, in dispatch order.
    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_reply(&self) -> ScriptedReply {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::text("No further scripted responses."))
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn dispatch(&self, request: DispatchRequest) -> Result<mpsc::Receiver<WorkerEvent>> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let reply = self.next_reply();
        if reply.unavailable {
            bail!("scripted worker '{}' is unavailable", self.id);
        }

        let (tx, rx) = mpsc::channel(32);
        let worker_id = self.id.clone();
        tokio::spawn(async move {
            for action in &reply.actions {
                let event = WorkerEvent::Action {
                    action: ActionRecord::new(action.kind, &action.target),
                };
                if tx.send(event).await.is_err() {
                    // Receiver dropped; the dispatch was cancelled.
                    return;
                }
            }
            if reply.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(reply.delay_ms)).await;
            }
            let response = WorkerResponse::new(&worker_id, request.step_index, &reply.response);
            tx.send(WorkerEvent::Final { response }).await.ok();
        });

        Ok(rx)
    }
}
