//! Step execution controller.
//!
//! Drives a plan one step at a time: allocate a worker, dispatch with
//! boundary limits, watch the action stream, then decide what happens
//! next. Loop detection runs before completion validation, and the
//! current-step pointer only ever moves through the store's
//! compare-and-swap, so a stale caller can never advance the plan twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::allocation::{AgentAllocator, PreviousAllocation};
use crate::boundary::{BoundaryController, BoundaryMonitor, BoundaryVerdict};
use crate::context::ContextManager;
use crate::errors::{ExecutionError, StoreError};
use crate::execution::escalation::{EscalationHandler, EscalationOption, EscalationPrompt};
use crate::execution::events::ExecutionEvent;
use crate::loops::{ActionRecord, LoopDetector, LoopPolicy, LoopRecommendation};
use crate::plan::{
    CompletionKind, Plan, PlanState, PlanStorage, PlanStore, Step, StepStatus, WorkerResponse,
};
use crate::session::{ExecutionSession, SessionBudgets};
use crate::validation::{
    CompletionPolicy, CompletionValidator, ReplanRequest, parse_replan_request, score_quality,
};
use crate::workers::{DispatchRequest, Worker, WorkerEvent, WorkerRegistry};

/// Allocation confidence below this asks the human before dispatching.
const ALLOCATION_CONFIDENCE_FLOOR: f64 = 0.4;

/// How many times a single attempt retries a worker that will not start.
const DISPATCH_ATTEMPTS: u32 = 2;

/// Pause between dispatch retries.
const DISPATCH_RETRY_DELAY_MS: u64 = 250;

/// What the driver should do after a step evaluation.
///
/// `Advance` hands control back to the driver, which re-reads the
/// store's current index; after a re-plan that index points at the
/// replacement step rather than the next one.
#[derive(Debug)]
pub enum NextAction {
    /// Re-read the current index and keep going.
    Advance,
    /// Dispatch the same step again with a refined instruction.
    RetryStep,
    /// Block on a human decision before anything else happens.
    EscalateToHuman(EscalationPrompt),
    /// Stop executing the plan.
    AbortPlan { reason: String },
}

/// Summary of one plan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub plan_id: Uuid,
    /// True when every step is terminal, none failed, and nothing aborted.
    pub success: bool,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Completed steps whose completion was forced rather than validated.
    pub forced: usize,
    /// Why the run stopped early, when it did.
    pub aborted: Option<String>,
}

/// Executes a plan against a registry of workers.
pub struct ExecutionController {
    store: PlanStore,
    session: ExecutionSession,
    allocator: AgentAllocator,
    boundaries: BoundaryController,
    context: ContextManager,
    loop_policy: Box<dyn LoopPolicy>,
    completion_policy: Box<dyn CompletionPolicy>,
    registry: WorkerRegistry,
    storage: Option<Arc<dyn PlanStorage>>,
    events: Option<mpsc::Sender<ExecutionEvent>>,
    escalation: Arc<dyn EscalationHandler>,
    /// Refined instructions for steps being retried, keyed by step index.
    refinements: HashMap<usize, String>,
    /// The most recent successful allocation, for locality tie-breaking.
    last_allocation: Option<PreviousAllocation>,
    allocation_floor: f64,
}

impl ExecutionController {
    /// Create a controller for a fresh plan with default policies.
    pub fn new(
        plan: Plan,
        registry: WorkerRegistry,
        escalation: Arc<dyn EscalationHandler>,
    ) -> Self {
        let session = ExecutionSession::new(&plan, SessionBudgets::default());
        Self {
            store: PlanStore::new(plan),
            session,
            allocator: AgentAllocator::default(),
            boundaries: BoundaryController::new(),
            context: ContextManager::new(),
            loop_policy: Box::new(LoopDetector::default()),
            completion_policy: Box::new(CompletionValidator::default()),
            registry,
            storage: None,
            events: None,
            escalation,
            refinements: HashMap::new(),
            last_allocation: None,
            allocation_floor: ALLOCATION_CONFIDENCE_FLOOR,
        }
    }

    /// Resume a controller from a persisted plan state.
    pub fn resume(
        state: PlanState,
        registry: WorkerRegistry,
        escalation: Arc<dyn EscalationHandler>,
    ) -> Result<Self, StoreError> {
        let store = PlanStore::from_state(state)?;
        let session = ExecutionSession::new(store.plan(), SessionBudgets::default());
        Ok(Self {
            store,
            session,
            allocator: AgentAllocator::default(),
            boundaries: BoundaryController::new(),
            context: ContextManager::new(),
            loop_policy: Box::new(LoopDetector::default()),
            completion_policy: Box::new(CompletionValidator::default()),
            registry,
            storage: None,
            events: None,
            escalation,
            refinements: HashMap::new(),
            last_allocation: None,
            allocation_floor: ALLOCATION_CONFIDENCE_FLOOR,
        })
    }

    /// Replace the session budgets.
    pub fn with_budgets(mut self, budgets: SessionBudgets) -> Self {
        self.session = ExecutionSession::new(self.store.plan(), budgets);
        self
    }

    /// Replace the worker allocator.
    pub fn with_allocator(mut self, allocator: AgentAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// Replace the boundary profile table.
    pub fn with_boundaries(mut self, boundaries: BoundaryController) -> Self {
        self.boundaries = boundaries;
        self
    }

    /// Replace the loop detection policy.
    pub fn with_loop_policy(mut self, policy: Box<dyn LoopPolicy>) -> Self {
        self.loop_policy = policy;
        self
    }

    /// Replace the completion validation policy.
    pub fn with_completion_policy(mut self, policy: Box<dyn CompletionPolicy>) -> Self {
        self.completion_policy = policy;
        self
    }

    /// Persist plan state after every transition.
    pub fn with_storage(mut self, storage: Arc<dyn PlanStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<ExecutionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Override the allocation confidence floor.
    pub fn with_allocation_floor(mut self, floor: f64) -> Self {
        self.allocation_floor = floor;
        self
    }

    /// Read access to the plan store.
    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    /// Read access to the session.
    pub fn session(&self) -> &ExecutionSession {
        &self.session
    }

    /// Read access to accumulated cross-step context.
    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    /// Run the whole plan to a terminal state.
    ///
    /// Escalation prompts returned by [`run_step`](Self::run_step) are
    /// resolved through the configured handler before the loop
    /// continues.
    pub async fn run_plan(&mut self) -> Result<ExecutionReport, ExecutionError> {
        self.emit(ExecutionEvent::PlanStarted {
            plan_id: self.store.plan().id,
            task: self.store.plan().task.clone(),
            steps: self.store.plan().len(),
        })
        .await;

        let mut aborted = None;
        while !self.store.is_complete() {
            let index = self.store.current_step_index();
            match self.run_step(index).await? {
                NextAction::Advance => {}
                NextAction::RetryStep => {
                    tokio::time::sleep(self.session.budgets.retry_delay()).await;
                }
                NextAction::EscalateToHuman(prompt) => {
                    let handler = Arc::clone(&self.escalation);
                    let choice = handler.escalate(&prompt).await?;
                    if let Some(reason) = self.apply_escalation(&prompt, choice).await? {
                        aborted = Some(reason);
                        break;
                    }
                }
                NextAction::AbortPlan { reason } => {
                    aborted = Some(reason);
                    break;
                }
            }
        }

        self.session.finish();
        let report = self.report(aborted);
        self.persist().await;
        self.emit(ExecutionEvent::PlanCompleted {
            plan_id: report.plan_id,
            completed: report.completed,
            failed: report.failed,
            skipped: report.skipped,
            success: report.success,
        })
        .await;
        Ok(report)
    }

    /// Execute one attempt of the step at `step_index` and decide what
    /// happens next.
    ///
    /// Calls for a step that is not the store's current step are no-ops;
    /// the single advancement path is the store's compare-and-swap, so
    /// repeated calls for an already-completed step cannot advance the
    /// plan twice or re-dispatch the work.
    pub async fn run_step(&mut self, step_index: usize) -> Result<NextAction, ExecutionError> {
        let plan_len = self.store.plan().len();
        let mut step = match self.store.plan().step(step_index) {
            Some(step) => step.clone(),
            None => {
                return Err(StoreError::StepOutOfRange {
                    index: step_index,
                    len: plan_len,
                }
                .into());
            }
        };

        // Only the current step may execute.
        if self.store.current_step_index() != step_index {
            return Ok(NextAction::Advance);
        }

        // A terminal record means this call is a replay (for example a
        // resume from disk); settle it without dispatching anything.
        if let Some(record) = self.store.record(step_index) {
            match record.status {
                StepStatus::Completed | StepStatus::Skipped => {
                    self.store.try_advance(step_index);
                    return Ok(NextAction::Advance);
                }
                StepStatus::Failed => {
                    let last = record
                        .evidence
                        .last()
                        .cloned()
                        .unwrap_or_else(|| "no evidence recorded".to_string());
                    let prompt = EscalationPrompt::new(
                        step_index,
                        format!("Step '{}' previously failed: {last}", step.title),
                        vec![
                            EscalationOption::Retry,
                            EscalationOption::Proceed,
                            EscalationOption::Skip,
                            EscalationOption::Abort,
                        ],
                    );
                    self.emit(ExecutionEvent::EscalationRaised {
                        step_index,
                        reason: prompt.reason.clone(),
                    })
                    .await;
                    return Ok(NextAction::EscalateToHuman(prompt));
                }
                StepStatus::NotStarted | StepStatus::InProgress => {}
            }
        }

        if let Err(err) = self.store.verify_fingerprint() {
            return Err(ExecutionError::PlanInvalidated {
                reason: err.to_string(),
            });
        }

        let worker_id = match step.assigned_worker.clone() {
            Some(id) => id,
            None => {
                let decision = self.allocator.allocate(&step, self.last_allocation.as_ref());
                self.store.assign_worker(step_index, &decision.worker_id)?;
                self.store.ensure_record(step_index)?.add_evidence(format!(
                    "Allocated to '{}' (confidence {:.2}): {}",
                    decision.worker_id, decision.confidence, decision.rationale
                ));
                if !decision.is_confident(self.allocation_floor) {
                    let err = ExecutionError::AllocationAmbiguous {
                        step_index,
                        candidate: decision.worker_id.clone(),
                        confidence: decision.confidence,
                    };
                    let prompt = EscalationPrompt::new(
                        step_index,
                        err.to_string(),
                        vec![
                            EscalationOption::Proceed,
                            EscalationOption::Skip,
                            EscalationOption::Abort,
                        ],
                    );
                    self.emit(ExecutionEvent::EscalationRaised {
                        step_index,
                        reason: prompt.reason.clone(),
                    })
                    .await;
                    return Ok(NextAction::EscalateToHuman(prompt));
                }
                decision.worker_id
            }
        };
        step.assigned_worker = Some(worker_id.clone());

        let Some(worker) = self.registry.get(&worker_id) else {
            let reason = format!(
                "No worker '{worker_id}' is registered for step '{}'",
                step.title
            );
            let prompt = EscalationPrompt::new(
                step_index,
                reason.clone(),
                vec![EscalationOption::Skip, EscalationOption::Abort],
            );
            self.emit(ExecutionEvent::EscalationRaised {
                step_index,
                reason,
            })
            .await;
            return Ok(NextAction::EscalateToHuman(prompt));
        };

        let limits = self.boundaries.limits_for_step(&step);
        let attempt = {
            let record = self.store.ensure_record(step_index)?;
            record.begin_attempt(&worker_id);
            record.attempts
        };
        self.persist().await;
        self.emit(ExecutionEvent::StepStarted {
            step_index,
            title: step.title.clone(),
            worker: worker_id.clone(),
            attempt,
        })
        .await;

        let instruction = self
            .refinements
            .get(&step_index)
            .cloned()
            .unwrap_or_else(|| step.instruction.clone());
        let context_block = self
            .context
            .relevant_context(&step, self.session.budgets.context_budget_chars);
        let request = DispatchRequest {
            step_index,
            instruction,
            context: context_block,
            limits,
            attempt,
        };
        debug!(step = step_index, worker = %worker_id, attempt, "dispatching step");

        let mut rx = match self.dispatch_with_retry(&worker, request).await {
            Ok(rx) => rx,
            Err(reason) => {
                let err = ExecutionError::WorkerUnavailable {
                    worker: worker_id.clone(),
                    attempts: DISPATCH_ATTEMPTS,
                    reason,
                };
                self.store.ensure_record(step_index)?.add_evidence(err.to_string());
                let prompt = EscalationPrompt::new(
                    step_index,
                    err.to_string(),
                    vec![
                        EscalationOption::Retry,
                        EscalationOption::Skip,
                        EscalationOption::Abort,
                    ],
                );
                self.emit(ExecutionEvent::EscalationRaised {
                    step_index,
                    reason: prompt.reason.clone(),
                })
                .await;
                return Ok(NextAction::EscalateToHuman(prompt));
            }
        };

        // Consume the action stream under the boundary monitor. The
        // monitor counts actions; the timeout covers the remaining time
        // budget between events.
        let mut monitor = BoundaryMonitor::start(limits);
        let mut actions: Vec<ActionRecord> = Vec::new();
        let mut final_response: Option<WorkerResponse> = None;
        let mut breach: Option<BoundaryVerdict> = None;
        loop {
            let remaining = limits.time_budget().saturating_sub(monitor.elapsed());
            if remaining.is_zero() {
                breach = Some(BoundaryVerdict::TimeBudgetExhausted);
                break;
            }
            match timeout(remaining, rx.recv()).await {
                Err(_) => {
                    breach = Some(BoundaryVerdict::TimeBudgetExhausted);
                    break;
                }
                Ok(None) => break,
                Ok(Some(WorkerEvent::Action { action })) => {
                    self.emit(ExecutionEvent::WorkerAction {
                        step_index,
                        action: action.clone(),
                    })
                    .await;
                    actions.push(action);
                    let verdict = monitor.record_action();
                    if verdict.is_breach() {
                        breach = Some(verdict);
                        break;
                    }
                }
                Ok(Some(WorkerEvent::Final { response })) => {
                    final_response = Some(response);
                    break;
                }
            }
        }
        drop(rx);

        if let Some(verdict) = breach {
            let limit = monitor.describe(verdict);
            self.emit(ExecutionEvent::BoundaryBreached {
                step_index,
                limit: limit.clone(),
            })
            .await;
            if actions.is_empty() && final_response.is_none() {
                // Nothing useful was produced; spend the attempt.
                return self
                    .reject_attempt(
                        &step,
                        attempt,
                        format!("Boundary reached with no output: {limit}"),
                        Vec::new(),
                    )
                    .await;
            }
            let kind = match verdict {
                BoundaryVerdict::TimeBudgetExhausted => CompletionKind::Timeout,
                _ => CompletionKind::Boundary,
            };
            let content = final_response
                .map(|response| response.content)
                .unwrap_or_else(|| action_trail(&actions));
            let evidence = vec![
                ExecutionError::BoundaryExceeded {
                    step_index,
                    limit: limit.clone(),
                }
                .to_string(),
            ];
            return self
                .complete_step(
                    &step,
                    kind,
                    &content,
                    evidence,
                    format!("Forced completion: {limit}"),
                    Some(monitor.time_used_fraction()),
                )
                .await;
        }

        let Some(response) = final_response else {
            return self
                .reject_attempt(
                    &step,
                    attempt,
                    "Worker stream ended without a final response".to_string(),
                    Vec::new(),
                )
                .await;
        };
        self.store.ensure_record(step_index)?.push_response(response.clone());

        // A plan-invalid signal short-circuits evaluation entirely.
        if let Some(replan) = parse_replan_request(&response.content) {
            if replan.remaining_steps_invalid {
                return self.handle_replan(&step, replan).await;
            }
            self.store.ensure_record(step_index)?.add_evidence(format!(
                "Worker flagged a plan concern without invalidating it: {}",
                replan.reason
            ));
        }

        // Loop detection runs before completion validation so a looping
        // worker cannot talk its way into a clean completion.
        let check = self
            .loop_policy
            .detect(&actions, !response.content.trim().is_empty());
        if check.detected {
            let pattern = check
                .pattern
                .clone()
                .unwrap_or_else(|| "repeated actions".to_string());
            self.emit(ExecutionEvent::LoopDetected {
                step_index,
                pattern: pattern.clone(),
            })
            .await;
            return match check.recommendation {
                Some(LoopRecommendation::ForceCompleteWithPartialEvidence) => {
                    let evidence = vec![
                        ExecutionError::LoopDetected {
                            step_index,
                            pattern: pattern.clone(),
                        }
                        .to_string(),
                    ];
                    self.complete_step(
                        &step,
                        CompletionKind::Fallback,
                        &response.content,
                        evidence,
                        format!("Forced completion after loop: {pattern}"),
                        Some(monitor.time_used_fraction()),
                    )
                    .await
                }
                _ => {
                    self.reject_attempt(
                        &step,
                        attempt,
                        format!("Looping without progress: {pattern}"),
                        Vec::new(),
                    )
                    .await
                }
            };
        }

        let outcome = match self.store.record(step_index) {
            Some(record) => self.completion_policy.validate(&response, &step, record),
            None => {
                return Err(StoreError::StepOutOfRange {
                    index: step_index,
                    len: self.store.plan().len(),
                }
                .into());
            }
        };
        if outcome.approved {
            let kind = outcome.kind.unwrap_or_default();
            self.complete_step(
                &step,
                kind,
                &response.content,
                outcome.evidence,
                outcome.reason,
                Some(monitor.time_used_fraction()),
            )
            .await
        } else {
            self.reject_attempt(&step, attempt, outcome.reason, outcome.evidence)
                .await
        }
    }

    /// Dispatch to a worker, retrying a bounded number of times when the
    /// worker cannot start. Returns the last failure reason when all
    /// tries are spent.
    async fn dispatch_with_retry(
        &self,
        worker: &Arc<dyn Worker>,
        request: DispatchRequest,
    ) -> Result<mpsc::Receiver<WorkerEvent>, String> {
        let mut last_error = String::new();
        for dispatch_try in 1..=DISPATCH_ATTEMPTS {
            match worker.dispatch(request.clone()).await {
                Ok(rx) => return Ok(rx),
                Err(err) => {
                    warn!(
                        worker = worker.id(),
                        dispatch_try,
                        "worker dispatch failed: {err}"
                    );
                    last_error = err.to_string();
                    if dispatch_try < DISPATCH_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(DISPATCH_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Replace the remaining plan after a worker invalidated it.
    async fn handle_replan(
        &mut self,
        step: &Step,
        request: ReplanRequest,
    ) -> Result<NextAction, ExecutionError> {
        let step_index = step.index;
        if request.steps.is_empty() {
            let prompt = EscalationPrompt::new(
                step_index,
                format!(
                    "Worker reports the remaining plan is invalid: {}",
                    request.reason
                ),
                vec![
                    EscalationOption::Retry,
                    EscalationOption::Skip,
                    EscalationOption::Abort,
                ],
            );
            self.emit(ExecutionEvent::EscalationRaised {
                step_index,
                reason: prompt.reason.clone(),
            })
            .await;
            return Ok(NextAction::EscalateToHuman(prompt));
        }
        if !self.session.try_consume_replan() {
            return Err(ExecutionError::PlanInvalidated {
                reason: format!("Re-plan budget exhausted: {}", request.reason),
            });
        }
        self.store.apply_replan(step_index, request.steps)?;
        self.refinements.retain(|index, _| *index < step_index);
        self.persist().await;
        self.emit(ExecutionEvent::ReplanApplied {
            from_index: step_index,
            reason: request.reason,
            new_len: self.store.plan().len(),
        })
        .await;
        Ok(NextAction::Advance)
    }

    /// Mark a step completed, record its outcome for later steps, and
    /// advance the current-step pointer.
    async fn complete_step(
        &mut self,
        step: &Step,
        kind: CompletionKind,
        content: &str,
        extra_evidence: Vec<String>,
        reason: String,
        time_fraction: Option<f64>,
    ) -> Result<NextAction, ExecutionError> {
        let quality = score_quality(kind, content, time_fraction);
        {
            let record = self.store.ensure_record(step.index)?;
            for line in extra_evidence {
                record.add_evidence(line);
            }
            record.complete(kind, quality, reason.clone());
        }
        if !content.trim().is_empty() {
            self.context.record_outcome(step, content);
        }
        self.refinements.remove(&step.index);
        if let Some(worker) = &step.assigned_worker {
            self.last_allocation = Some(PreviousAllocation {
                category: step.category,
                worker_id: worker.clone(),
            });
        }
        self.store.try_advance(step.index);
        self.persist().await;
        self.emit(ExecutionEvent::StepCompleted {
            step_index: step.index,
            kind,
            quality,
            evidence: reason,
        })
        .await;
        Ok(NextAction::Advance)
    }

    /// Record a rejected attempt, then either schedule a retry with a
    /// refined instruction or fail the step and ask the human.
    async fn reject_attempt(
        &mut self,
        step: &Step,
        attempt: u32,
        reason: String,
        extra_evidence: Vec<String>,
    ) -> Result<NextAction, ExecutionError> {
        {
            let record = self.store.ensure_record(step.index)?;
            for line in extra_evidence {
                record.add_evidence(line);
            }
            record.add_evidence(format!("Attempt {attempt} rejected: {reason}"));
        }
        if attempt < self.session.budgets.max_attempts {
            // Refinements always build on the original instruction so
            // repeated rejections do not compound the text.
            self.refinements.insert(
                step.index,
                format!(
                    "{}\n\nThe previous attempt did not complete the step: {reason}\nTake a different approach and finish with a concrete result.",
                    step.instruction
                ),
            );
            self.persist().await;
            self.emit(ExecutionEvent::StepRetrying {
                step_index: step.index,
                attempt,
                reason,
            })
            .await;
            Ok(NextAction::RetryStep)
        } else {
            {
                let record = self.store.ensure_record(step.index)?;
                record.fail(format!("Attempts exhausted after {attempt}"));
            }
            self.persist().await;
            self.emit(ExecutionEvent::StepFailed {
                step_index: step.index,
                attempts: attempt,
                reason: reason.clone(),
            })
            .await;
            let prompt = EscalationPrompt::new(
                step.index,
                format!(
                    "Step '{}' failed after {attempt} attempt(s): {reason}",
                    step.title
                ),
                vec![
                    EscalationOption::Retry,
                    EscalationOption::Proceed,
                    EscalationOption::Skip,
                    EscalationOption::Abort,
                ],
            );
            self.emit(ExecutionEvent::EscalationRaised {
                step_index: step.index,
                reason: prompt.reason.clone(),
            })
            .await;
            Ok(NextAction::EscalateToHuman(prompt))
        }
    }

    /// Apply a human escalation choice. Returns the abort reason when
    /// the choice stops the plan.
    async fn apply_escalation(
        &mut self,
        prompt: &EscalationPrompt,
        choice: EscalationOption,
    ) -> Result<Option<String>, ExecutionError> {
        let step_index = prompt.step_index;
        match choice {
            EscalationOption::Abort => Ok(Some(format!(
                "Aborted at step {}: {}",
                step_index + 1,
                prompt.reason
            ))),
            EscalationOption::Skip => {
                {
                    let record = self.store.ensure_record(step_index)?;
                    record.skip(format!("Skipped by human decision: {}", prompt.reason));
                }
                self.refinements.remove(&step_index);
                self.store.try_advance(step_index);
                self.persist().await;
                self.emit(ExecutionEvent::StepSkipped {
                    step_index,
                    reason: prompt.reason.clone(),
                })
                .await;
                Ok(None)
            }
            EscalationOption::Retry => {
                if let Some(record) = self.store.record_mut(step_index) {
                    record.reopen("Reopened by human decision");
                }
                self.refinements.remove(&step_index);
                self.persist().await;
                Ok(None)
            }
            EscalationOption::Proceed => {
                // Proceed on a failed step force-completes it with the
                // output that already exists. Anywhere else (an accepted
                // low-confidence allocation) it just resumes execution.
                let failed = self
                    .store
                    .record(step_index)
                    .map(|record| record.status == StepStatus::Failed)
                    .unwrap_or(false);
                if !failed {
                    return Ok(None);
                }
                let step = match self.store.plan().step(step_index) {
                    Some(step) => step.clone(),
                    None => {
                        return Err(StoreError::StepOutOfRange {
                            index: step_index,
                            len: self.store.plan().len(),
                        }
                        .into());
                    }
                };
                let content = self
                    .store
                    .record(step_index)
                    .and_then(|record| record.last_response())
                    .map(|response| response.content.clone())
                    .unwrap_or_default();
                self.complete_step(
                    &step,
                    CompletionKind::Forced,
                    &content,
                    Vec::new(),
                    "Force-completed by human decision".to_string(),
                    None,
                )
                .await?;
                Ok(None)
            }
        }
    }

    fn report(&self, aborted: Option<String>) -> ExecutionReport {
        let mut completed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut forced = 0;
        for record in self.store.records() {
            match record.status {
                StepStatus::Completed => {
                    completed += 1;
                    if record.completion.map(|kind| kind.is_forced()).unwrap_or(false) {
                        forced += 1;
                    }
                }
                StepStatus::Failed => failed += 1,
                StepStatus::Skipped => skipped += 1,
                StepStatus::NotStarted | StepStatus::InProgress => {}
            }
        }
        let success = aborted.is_none() && failed == 0 && self.store.is_complete();
        ExecutionReport {
            plan_id: self.store.plan().id,
            success,
            completed,
            failed,
            skipped,
            forced,
            aborted,
        }
    }

    async fn persist(&self) {
        if let Some(storage) = &self.storage {
            let state = self.store.snapshot();
            if let Err(err) = storage.save(&state).await {
                warn!("failed to persist plan state: {err}");
            }
        }
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.events {
            tx.send(event).await.ok();
        }
    }
}

/// Summarize an action trail for a forced completion without a final
/// response.
fn action_trail(actions: &[ActionRecord]) -> String {
    let shown = actions.iter().rev().take(5).collect::<Vec<_>>();
    let signatures = shown
        .iter()
        .rev()
        .map(|action| action.signature())
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "Boundary reached after {} action(s). Most recent: {signatures}",
        actions.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::escalation::AutoEscalation;
    use crate::loops::ActionKind;
    use crate::plan::{MemoryStorage, StepCategory};
    use crate::workers::{ScriptedReply, ScriptedWorker};

    const VALID_RESEARCH: &str = "Collected the pricing data from the vendor page: basic $10, pro $25, enterprise $99. <step-complete/>";
    const VALID_SUMMARY: &str = "Drafted the comparison brief covering all three vendor tiers with pricing deltas and a recommendation. <step-complete/>";
    const DEFLECTION: &str = "I understand the task. I can help you with that request right away.";

    fn quick_budgets() -> SessionBudgets {
        SessionBudgets {
            max_attempts: 3,
            max_replans: 2,
            retry_delay_secs: 0,
            context_budget_chars: 2000,
        }
    }

    fn registry_with(workers: Vec<Arc<ScriptedWorker>>) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for worker in workers {
            registry.register(worker);
        }
        registry
    }

    fn research_step(index: usize, title: &str) -> Step {
        Step::new(
            index,
            title,
            "Collect the vendor pricing data from the published price list",
            StepCategory::InformationGathering,
        )
    }

    fn controller_for(
        plan: Plan,
        workers: Vec<Arc<ScriptedWorker>>,
        escalation: AutoEscalation,
    ) -> ExecutionController {
        ExecutionController::new(plan, registry_with(workers), Arc::new(escalation))
            .with_budgets(quick_budgets())
    }

    // =========================================
    // Single-step paths
    // =========================================

    #[tokio::test]
    async fn test_clean_step_completes_and_advances() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![ScriptedReply::text(VALID_RESEARCH)],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        let mut controller = controller_for(
            plan,
            vec![browser.clone()],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        assert_eq!(report.completed, 1);
        assert_eq!(report.forced, 0);
        let record = controller.store().record(0).unwrap();
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.completion, Some(CompletionKind::Normal));
        assert_eq!(record.attempts, 1);
        assert!(controller.store().is_complete());
    }

    #[tokio::test]
    async fn test_run_step_on_non_current_index_is_noop() {
        let browser = Arc::new(ScriptedWorker::new("browser"));
        let plan = Plan::new(
            "Price research",
            vec![research_step(0, "Collect"), research_step(1, "Compare")],
        );
        let mut controller = controller_for(
            plan,
            vec![browser.clone()],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let action = controller.run_step(1).await.unwrap();

        assert!(matches!(action, NextAction::Advance));
        assert!(controller.store().record(1).is_none());
        assert!(browser.requests().is_empty());
    }

    #[tokio::test]
    async fn test_run_step_out_of_range_errors() {
        let plan = Plan::new("Price research", vec![research_step(0, "Collect")]);
        let mut controller = controller_for(
            plan,
            vec![],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let err = controller.run_step(7).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Store(StoreError::StepOutOfRange { index: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_step_rerun_does_not_redispatch() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![ScriptedReply::text(VALID_RESEARCH)],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        let mut controller = controller_for(
            plan,
            vec![browser.clone()],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let first = controller.run_step(0).await.unwrap();
        assert!(matches!(first, NextAction::Advance));
        let second = controller.run_step(0).await.unwrap();
        assert!(matches!(second, NextAction::Advance));

        assert_eq!(browser.requests().len(), 1);
        assert_eq!(controller.store().record(0).unwrap().attempts, 1);
    }

    // =========================================
    // Retry and refinement
    // =========================================

    #[tokio::test]
    async fn test_deflection_is_retried_then_valid_response_advances() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![
                ScriptedReply::text(DEFLECTION),
                ScriptedReply::text(VALID_RESEARCH),
            ],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        let mut controller = controller_for(
            plan,
            vec![browser.clone()],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        let record = controller.store().record(0).unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.status, StepStatus::Completed);

        // The retry instruction is refined; the first is the original.
        let requests = browser.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].instruction.contains("previous attempt"));
        assert!(requests[1].instruction.contains("previous attempt"));
        assert!(requests[1]
            .instruction
            .contains("Collect the vendor pricing data"));
    }

    #[tokio::test]
    async fn test_attempts_exhausted_fails_then_skip_keeps_plan_going() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![
                ScriptedReply::text(DEFLECTION),
                ScriptedReply::text(DEFLECTION),
                ScriptedReply::text(DEFLECTION),
            ],
        ));
        let coder = Arc::new(ScriptedWorker::with_replies(
            "coder",
            vec![ScriptedReply::text(VALID_SUMMARY)],
        ));
        let mut step2 = Step::new(
            1,
            "Summarize",
            "Write a short pricing comparison brief",
            StepCategory::ContentGeneration,
        );
        step2.assigned_worker = Some("coder".to_string());
        let plan = Plan::new(
            "Price research",
            vec![research_step(0, "Collect prices"), step2],
        );
        let mut controller = controller_for(
            plan,
            vec![browser, coder],
            AutoEscalation::new(EscalationOption::Skip),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.completed, 1);
        let record = controller.store().record(0).unwrap();
        assert_eq!(record.status, StepStatus::Skipped);
        assert_eq!(controller.store().record(1).unwrap().status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_escalation_retry_reopens_the_attempt_budget() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![
                ScriptedReply::text(DEFLECTION),
                ScriptedReply::text(DEFLECTION),
                ScriptedReply::text(DEFLECTION),
                ScriptedReply::text(VALID_RESEARCH),
            ],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        let mut controller = controller_for(
            plan,
            vec![browser],
            AutoEscalation::with_choices(
                EscalationOption::Abort,
                vec![EscalationOption::Retry],
            ),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        let record = controller.store().record(0).unwrap();
        assert_eq!(record.status, StepStatus::Completed);
        // Reopened after three rejections, then completed on the first
        // attempt of the fresh budget.
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_escalation_abort_stops_the_plan() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![
                ScriptedReply::text(DEFLECTION),
                ScriptedReply::text(DEFLECTION),
                ScriptedReply::text(DEFLECTION),
            ],
        ));
        let plan = Plan::new(
            "Price research",
            vec![research_step(0, "Collect"), research_step(1, "Compare")],
        );
        let mut controller = controller_for(
            plan,
            vec![browser],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(!report.success);
        assert!(report.aborted.is_some());
        assert_eq!(report.failed, 1);
        assert!(controller.store().record(1).is_none());
    }

    // =========================================
    // Loop detection and boundaries
    // =========================================

    #[tokio::test]
    async fn test_repeated_action_forces_fallback_completion() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![
                ScriptedReply::text(
                    "Partial data gathered before the page stopped loading: total revenue $1.2M.",
                )
                .with_actions(vec![
                    (ActionKind::Navigate, "https://example.com/data"),
                    (ActionKind::Navigate, "https://example.com/data"),
                ]),
            ],
        ));
        let plan = Plan::new("Revenue research", vec![research_step(0, "Collect data")]);
        let mut controller = controller_for(
            plan,
            vec![browser],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        assert_eq!(report.forced, 1);
        let record = controller.store().record(0).unwrap();
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.completion, Some(CompletionKind::Fallback));
        assert!(record.quality.unwrap() > 0.0);
        assert!(record
            .evidence
            .iter()
            .any(|line| line.contains("looping") || line.contains("loop")));
    }

    #[tokio::test]
    async fn test_action_limit_forces_boundary_completion() {
        let file_manager = Arc::new(ScriptedWorker::with_replies(
            "file-manager",
            vec![ScriptedReply::text("Moved everything.").with_actions(vec![
                (ActionKind::WriteFile, "/tmp/a.txt"),
                (ActionKind::WriteFile, "/tmp/b.txt"),
                (ActionKind::WriteFile, "/tmp/c.txt"),
            ])],
        ));
        let plan = Plan::new(
            "File shuffle",
            vec![Step::new(
                0,
                "Move reports",
                "Move the quarterly report files into the archive directory",
                StepCategory::FileOperation,
            )],
        );
        let mut controller = controller_for(
            plan,
            vec![file_manager],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        let record = controller.store().record(0).unwrap();
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(record.completion, Some(CompletionKind::Boundary));
        assert!(record
            .evidence
            .iter()
            .any(|line| line.contains("boundary") || line.contains("Forced completion")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget_forces_timeout_completion() {
        // Two actions arrive, then the worker stalls past the category's
        // time budget before its final response.
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![
                ScriptedReply::text("too late")
                    .with_actions(vec![
                        (ActionKind::Navigate, "https://example.com/a"),
                        (ActionKind::Navigate, "https://example.com/b"),
                    ])
                    .with_delay(400_000),
            ],
        ));
        let plan = Plan::new("Slow research", vec![research_step(0, "Collect prices")]);
        let mut controller = controller_for(
            plan,
            vec![browser],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        let record = controller.store().record(0).unwrap();
        assert_eq!(record.completion, Some(CompletionKind::Timeout));
        assert_eq!(record.status, StepStatus::Completed);
    }

    // =========================================
    // Allocation and workers
    // =========================================

    #[tokio::test]
    async fn test_low_confidence_allocation_escalates_and_proceed_continues() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![ScriptedReply::text(VALID_RESEARCH)],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        // No capability profiles at all, so allocation falls back with
        // low confidence.
        let mut controller = controller_for(
            plan,
            vec![browser],
            AutoEscalation::with_choices(EscalationOption::Abort, vec![EscalationOption::Proceed]),
        )
        .with_allocator(AgentAllocator::new(Vec::new()));

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        let record = controller.store().record(0).unwrap();
        assert_eq!(record.status, StepStatus::Completed);
        assert_eq!(
            controller.store().plan().step(0).unwrap().assigned_worker,
            Some("browser".to_string())
        );
        assert!(record
            .evidence
            .iter()
            .any(|line| line.contains("Allocated to 'browser'")));
    }

    #[tokio::test]
    async fn test_missing_worker_escalates_to_skip() {
        let mut step = research_step(0, "Collect prices");
        step.assigned_worker = Some("nonexistent".to_string());
        let plan = Plan::new("Price research", vec![step]);
        let mut controller = controller_for(
            plan,
            vec![],
            AutoEscalation::new(EscalationOption::Skip),
        );

        let report = controller.run_plan().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(
            controller.store().record(0).unwrap().status,
            StepStatus::Skipped
        );
    }

    #[tokio::test]
    async fn test_unavailable_worker_escalates_after_dispatch_retries() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![ScriptedReply::unavailable(), ScriptedReply::unavailable()],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        let mut controller = controller_for(
            plan,
            vec![browser.clone()],
            AutoEscalation::new(EscalationOption::Skip),
        );

        let report = controller.run_plan().await.unwrap();

        // Both scripted dispatch failures were consumed before escalating.
        assert_eq!(browser.remaining_replies(), 0);
        assert_eq!(report.skipped, 1);
        let record = controller.store().record(0).unwrap();
        assert!(record
            .evidence
            .iter()
            .any(|line| line.contains("unavailable")));
    }

    // =========================================
    // Cross-step context
    // =========================================

    #[tokio::test]
    async fn test_completed_step_context_flows_into_next_dispatch() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![ScriptedReply::text(
                "Saved the full vendor pricing table to pricing.csv for later comparison. <step-complete/>",
            )],
        ));
        let coder = Arc::new(ScriptedWorker::with_replies(
            "coder",
            vec![ScriptedReply::text(VALID_SUMMARY)],
        ));
        let mut step2 = Step::new(
            1,
            "Summarize pricing",
            "Summarize the findings from pricing.csv into a short brief",
            StepCategory::ContentGeneration,
        );
        step2.assigned_worker = Some("coder".to_string());
        let plan = Plan::new(
            "Price research",
            vec![research_step(0, "Collect prices"), step2],
        );
        let mut controller = controller_for(
            plan,
            vec![browser, coder.clone()],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        let requests = coder.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].context.contains("pricing.csv"));
        assert!(requests[0].context.contains("[step 1"));
    }

    // =========================================
    // Re-planning
    // =========================================

    #[tokio::test]
    async fn test_plan_invalid_signal_replaces_remaining_steps() {
        let replan_reply = r#"The vendor list page was removed, the rest of this plan cannot work.
<plan-invalid>{"reason": "vendor list page was removed", "remaining_steps_invalid": true, "steps": [{"title": "Check the archived mirror", "instruction": "Pull the vendor pricing data from the archived mirror of the price list", "category": "information-gathering"}]}</plan-invalid>"#;
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![
                ScriptedReply::text(VALID_RESEARCH),
                ScriptedReply::text(replan_reply),
                ScriptedReply::text(VALID_RESEARCH),
            ],
        ));
        let plan = Plan::new(
            "Price research",
            vec![research_step(0, "Collect"), research_step(1, "Compare")],
        );
        let mut controller = controller_for(
            plan,
            vec![browser],
            AutoEscalation::new(EscalationOption::Abort),
        );

        let report = controller.run_plan().await.unwrap();

        assert!(report.success);
        assert_eq!(report.completed, 2);
        assert_eq!(controller.session().replans_used(), 1);
        let plan = controller.store().plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.step(1).unwrap().title, "Check the archived mirror");
        // The spliced plan carries a refreshed fingerprint.
        assert!(controller.store().verify_fingerprint().is_ok());
    }

    #[tokio::test]
    async fn test_replan_budget_exhausted_invalidates_the_plan() {
        let replan_reply = r#"<plan-invalid>{"reason": "source is gone", "remaining_steps_invalid": true, "steps": [{"title": "Alternative", "instruction": "Use the fallback data source for vendor prices", "category": "information-gathering"}]}</plan-invalid>"#;
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![ScriptedReply::text(replan_reply)],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        let budgets = SessionBudgets {
            max_replans: 0,
            retry_delay_secs: 0,
            ..SessionBudgets::default()
        };
        let mut controller = ExecutionController::new(
            plan,
            registry_with(vec![browser]),
            Arc::new(AutoEscalation::new(EscalationOption::Abort)),
        )
        .with_budgets(budgets);

        let err = controller.run_plan().await.unwrap_err();
        assert!(matches!(err, ExecutionError::PlanInvalidated { .. }));
    }

    // =========================================
    // Events and persistence
    // =========================================

    #[tokio::test]
    async fn test_events_are_emitted_in_lifecycle_order() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![ScriptedReply::text(VALID_RESEARCH)],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        let (tx, mut rx) = mpsc::channel(64);
        let mut controller = controller_for(
            plan,
            vec![browser],
            AutoEscalation::new(EscalationOption::Abort),
        )
        .with_event_channel(tx);

        controller.run_plan().await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ExecutionEvent::PlanStarted { .. })));
        assert!(matches!(events.last(), Some(ExecutionEvent::PlanCompleted { success: true, .. })));
        assert!(events
            .iter()
            .any(|event| matches!(event, ExecutionEvent::StepStarted { attempt: 1, .. })));
        assert!(events
            .iter()
            .any(|event| matches!(event, ExecutionEvent::StepCompleted { .. })));
    }

    #[tokio::test]
    async fn test_plan_state_is_persisted_through_storage() {
        let browser = Arc::new(ScriptedWorker::with_replies(
            "browser",
            vec![ScriptedReply::text(VALID_RESEARCH)],
        ));
        let plan = Plan::new("Price research", vec![research_step(0, "Collect prices")]);
        let plan_id = plan.id;
        let storage = Arc::new(MemoryStorage::new());
        let mut controller = controller_for(
            plan,
            vec![browser],
            AutoEscalation::new(EscalationOption::Abort),
        )
        .with_storage(storage.clone());

        controller.run_plan().await.unwrap();

        let state = storage.load(plan_id).await.unwrap().unwrap();
        assert_eq!(state.current_step_index, 1);
        assert_eq!(
            state.records.get(&0).unwrap().status,
            StepStatus::Completed
        );
    }
}
