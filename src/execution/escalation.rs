//! Human escalation points.
//!
//! When the engine cannot make progress on its own (attempts exhausted,
//! ambiguous allocation, a worker that will not start) it raises an
//! escalation prompt and blocks on the answer.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A choice offered to the human at an escalation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationOption {
    /// Force-complete the step with whatever output exists and move on.
    Proceed,
    /// Reset the attempt counter and try the step again.
    Retry,
    /// Mark the step skipped and move on.
    Skip,
    /// Stop executing the plan.
    Abort,
}

impl EscalationOption {
    pub fn label(&self) -> &'static str {
        match self {
            EscalationOption::Proceed => "Proceed with current output",
            EscalationOption::Retry => "Retry the step",
            EscalationOption::Skip => "Skip this step",
            EscalationOption::Abort => "Abort the plan",
        }
    }
}

/// What the engine presents when it needs a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPrompt {
    /// Zero-based index of the step the decision applies to.
    pub step_index: usize,
    /// Why the engine stopped.
    pub reason: String,
    /// The choices on offer, in display order.
    pub options: Vec<EscalationOption>,
}

impl EscalationPrompt {
    pub fn new(step_index: usize, reason: impl Into<String>, options: Vec<EscalationOption>) -> Self {
        Self {
            step_index,
            reason: reason.into(),
            options,
        }
    }
}

/// Abstraction over human escalation for testability.
///
/// The interactive implementation prompts on the terminal; tests and
/// non-interactive runs use [`AutoEscalation`].
#[async_trait]
pub trait EscalationHandler: Send + Sync {
    /// Present the prompt and return the chosen option.
    ///
    /// Implementations must return one of `prompt.options`.
    async fn escalate(&self, prompt: &EscalationPrompt) -> Result<EscalationOption>;
}

/// Non-interactive handler that answers from a scripted queue.
///
/// Once the queue is exhausted it falls back to a default choice. Useful
/// for tests and for `--no-input` runs where blocking on a terminal is
/// not an option.
pub struct AutoEscalation {
    queue: Mutex<VecDeque<EscalationOption>>,
    default: EscalationOption,
}

impl AutoEscalation {
    pub fn new(default: EscalationOption) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
        }
    }

    pub fn with_choices(default: EscalationOption, choices: Vec<EscalationOption>) -> Self {
        Self {
            queue: Mutex::new(choices.into()),
            default,
        }
    }
}

#[async_trait]
impl EscalationHandler for AutoEscalation {
    async fn escalate(&self, prompt: &EscalationPrompt) -> Result<EscalationOption> {
        let queued = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.pop_front()
        };
        let choice = queued.unwrap_or(self.default);
        // Never answer with an option the prompt did not offer.
        if prompt.options.contains(&choice) {
            Ok(choice)
        } else {
            Ok(*prompt.options.first().unwrap_or(&EscalationOption::Abort))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_escalation_answers_from_queue_then_default() {
        let handler = AutoEscalation::with_choices(
            EscalationOption::Abort,
            vec![EscalationOption::Retry, EscalationOption::Skip],
        );
        let prompt = EscalationPrompt::new(
            0,
            "attempts exhausted",
            vec![
                EscalationOption::Retry,
                EscalationOption::Skip,
                EscalationOption::Abort,
            ],
        );

        assert_eq!(handler.escalate(&prompt).await.unwrap(), EscalationOption::Retry);
        assert_eq!(handler.escalate(&prompt).await.unwrap(), EscalationOption::Skip);
        assert_eq!(handler.escalate(&prompt).await.unwrap(), EscalationOption::Abort);
    }

    #[tokio::test]
    async fn test_auto_escalation_clamps_to_offered_options() {
        let handler = AutoEscalation::new(EscalationOption::Proceed);
        let prompt = EscalationPrompt::new(
            1,
            "no worker available",
            vec![EscalationOption::Skip, EscalationOption::Abort],
        );

        // Proceed is not offered, so the first offered option wins.
        assert_eq!(handler.escalate(&prompt).await.unwrap(), EscalationOption::Skip);
    }
}
