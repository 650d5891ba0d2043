use crate::execution::ExecutionEvent;
use crate::loops::ActionRecord;
use crate::plan::CompletionKind;
use crate::ui::icons::{
    ACTION, BOUNDARY, CHECK, CROSS, ESCALATE, LOOP, REPLAN, RETRY, SKIP, SPARKLE, WORKER,
};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Terminal UI for a plan run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Plan bar — tracks how many steps have settled (completed, failed, skipped)
/// - Step bar — spinner with the current step, worker, attempt, and live status
///
/// All methods coordinate output via `indicatif`'s `MultiProgress` internally.
/// [`Self::handle_event`] maps the execution event stream onto the bars, so a
/// consumer task only needs to forward events.
pub struct PlanUI {
    multi: MultiProgress,
    plan_bar: ProgressBar,
    step_bar: ProgressBar,
    verbose: bool,
    current_step: AtomicUsize,
    current_attempt: AtomicU32,
}

impl PlanUI {
    /// Create the UI and add both progress bars to the multiplex renderer.
    ///
    /// # Arguments
    /// * `total_steps` — number of steps in the plan, sizes the plan bar
    /// * `verbose` — when `true`, per-attempt detail is printed;
    ///               when `false` only action and outcome lines are shown
    ///
    /// Call this once before execution starts.
    pub fn new(total_steps: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let plan_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let plan_bar = multi.add(ProgressBar::new(total_steps));
        plan_bar.set_style(plan_style);
        plan_bar.set_prefix("Steps");

        let step_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let step_bar = multi.add(ProgressBar::new_spinner());
        step_bar.set_style(step_style);
        step_bar.set_prefix(" Step");

        Self {
            multi,
            plan_bar,
            step_bar,
            verbose,
            current_step: AtomicUsize::new(0),
            current_attempt: AtomicU32::new(0),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    ///
    /// This prevents silent loss of critical user-facing messages (escalations,
    /// forced completions) when the terminal or stdout is unavailable.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Run `f` with the progress bars cleared from the terminal.
    ///
    /// Used around interactive prompts so `dialoguer` owns the cursor.
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    /// Print the header block for the run before execution begins.
    ///
    /// # Arguments
    /// * `task` — the high-level task the plan decomposes
    /// * `steps` — number of steps in the plan
    pub fn print_plan_header(&self, task: &str, steps: usize) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} {}",
            style("▶").green().bold(),
            style(task).bold()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!("{}  {} steps", style("Plan:").dim(), steps));
        self.print_line("");
    }

    /// Route one execution event to the matching display method.
    pub fn handle_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::PlanStarted { task, steps, .. } => {
                self.print_plan_header(task, *steps);
            }
            ExecutionEvent::StepStarted {
                step_index,
                title,
                worker,
                attempt,
            } => self.start_step(*step_index, title, worker, *attempt),
            ExecutionEvent::WorkerAction { action, .. } => self.show_action(action),
            ExecutionEvent::StepRetrying {
                step_index,
                attempt,
                reason,
            } => self.step_retrying(*step_index, *attempt, reason),
            ExecutionEvent::StepCompleted {
                step_index,
                kind,
                quality,
                ..
            } => self.step_completed(*step_index, *kind, *quality),
            ExecutionEvent::StepFailed {
                step_index,
                attempts,
                reason,
            } => self.step_failed(*step_index, *attempts, reason),
            ExecutionEvent::StepSkipped { step_index, reason } => {
                self.step_skipped(*step_index, reason)
            }
            ExecutionEvent::LoopDetected { pattern, .. } => self.loop_detected(pattern),
            ExecutionEvent::BoundaryBreached { limit, .. } => self.boundary_breached(limit),
            ExecutionEvent::EscalationRaised { reason, .. } => self.escalation_raised(reason),
            ExecutionEvent::ReplanApplied {
                from_index,
                reason,
                new_len,
            } => self.replan_applied(*from_index, reason, *new_len),
            ExecutionEvent::PlanCompleted {
                completed,
                failed,
                skipped,
                success,
                ..
            } => self.plan_completed(*completed, *failed, *skipped, *success),
        }
    }

    /// Record step counters and start the spinner animation.
    ///
    /// Enables a 100 ms tick on the step spinner. The spinner stops when the
    /// step settles via [`Self::step_completed`], [`Self::step_failed`], or
    /// [`Self::step_skipped`].
    ///
    /// # Arguments
    /// * `step_index` — 0-based position of the step in the plan
    /// * `title` — short step title shown in the status line
    /// * `worker` — identifier of the worker the step was dispatched to
    /// * `attempt` — 1-based attempt number
    pub fn start_step(&self, step_index: usize, title: &str, worker: &str, attempt: u32) {
        self.current_step.store(step_index, Ordering::SeqCst);
        self.current_attempt.store(attempt, Ordering::SeqCst);
        self.plan_bar
            .set_message(format!("{}: {}", style(step_index + 1).yellow(), title));
        self.step_bar.set_message(format!(
            "Step {} {} {} {}",
            style(step_index + 1).cyan(),
            WORKER,
            style(worker).yellow(),
            style(format!("(attempt {})", attempt)).dim()
        ));
        self.step_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Show one worker action as it streams in.
    pub fn show_action(&self, action: &ActionRecord) {
        let step = self.current_step.load(Ordering::SeqCst);
        self.step_bar.set_message(format!(
            "Step {} {} {}",
            style(step + 1).cyan(),
            ACTION,
            style(&action.target).yellow()
        ));
        // Always print actions to give visibility
        self.print_line(format!(
            "    {} {} {}",
            ACTION,
            style(action.kind.as_str()).cyan(),
            style(&action.target).dim()
        ));
    }

    /// Announce a rejected attempt and the retry that follows.
    pub fn step_retrying(&self, step_index: usize, attempt: u32, reason: &str) {
        self.print_line(format!(
            "    {} Attempt {} on step {} rejected: {}",
            RETRY,
            attempt,
            step_index + 1,
            style(reason).dim()
        ));
        if self.verbose {
            self.print_line(format!(
                "    {} {}",
                style("→").dim(),
                style("re-dispatching with refined instruction").dim()
            ));
        }
    }

    /// Finish the step spinner and advance the plan bar.
    ///
    /// Forced completions (boundary, timeout, loop fallback) are flagged in
    /// yellow so the operator can spot degraded steps in the scrollback.
    pub fn step_completed(&self, step_index: usize, kind: CompletionKind, quality: f64) {
        if kind.is_forced() {
            self.step_bar.finish_with_message(format!(
                "{} Step {} force-completed ({}, quality {:.2})",
                CHECK,
                step_index + 1,
                style(kind.as_str()).yellow(),
                quality
            ));
        } else {
            self.step_bar.finish_with_message(format!(
                "{} Step {} complete (quality {:.2})",
                CHECK,
                step_index + 1,
                quality
            ));
        }
        self.plan_bar.inc(1);
    }

    /// Finish the step spinner with a failure message and advance the plan bar.
    pub fn step_failed(&self, step_index: usize, attempts: u32, reason: &str) {
        self.step_bar.finish_with_message(format!(
            "{} Step {} failed after {} attempt(s): {}",
            CROSS,
            step_index + 1,
            attempts,
            reason
        ));
        self.plan_bar.inc(1);
    }

    /// Finish the step spinner with a skip message and advance the plan bar.
    pub fn step_skipped(&self, step_index: usize, reason: &str) {
        self.step_bar.finish_with_message(format!(
            "{} Step {} skipped: {}",
            SKIP,
            step_index + 1,
            reason
        ));
        self.plan_bar.inc(1);
    }

    /// Show a loop-detection hit (always printed).
    pub fn loop_detected(&self, pattern: &str) {
        self.print_line(format!(
            "    {} {}",
            LOOP,
            style(format!("Loop detected: {}", pattern)).yellow().bold()
        ));
    }

    /// Show a boundary breach (always printed).
    pub fn boundary_breached(&self, limit: &str) {
        self.print_line(format!(
            "    {} {}",
            BOUNDARY,
            style(format!("Boundary: {}", limit)).yellow().bold()
        ));
    }

    /// Show that the run is waiting on a human decision.
    pub fn escalation_raised(&self, reason: &str) {
        self.print_line(format!(
            "    {} {}",
            ESCALATE,
            style(format!("Escalation: {}", reason)).magenta().bold()
        ));
    }

    /// Show a re-plan and resize the plan bar to the new step count.
    pub fn replan_applied(&self, from_index: usize, reason: &str, new_len: usize) {
        self.plan_bar.set_length(new_len as u64);
        self.print_line(format!(
            "    {} {}",
            REPLAN,
            style(format!(
                "Re-planned from step {}: {} ({} steps now)",
                from_index + 1,
                reason,
                new_len
            ))
            .cyan()
        ));
    }

    /// Print the final banner and stop both bars.
    ///
    /// # Arguments
    /// * `completed` — steps that reached `completed`
    /// * `failed` — steps that exhausted their attempts
    /// * `skipped` — steps skipped by human decision
    /// * `success` — whether the whole plan settled without failures
    pub fn plan_completed(&self, completed: usize, failed: usize, skipped: usize, success: bool) {
        self.step_bar.finish_and_clear();
        self.plan_bar.finish();
        let summary = format!(
            "{} completed, {} failed, {} skipped",
            style(completed).green(),
            style(failed).red(),
            style(skipped).yellow()
        );
        if success {
            self.print_line(format!(
                "\n{} Plan complete! {}\n",
                SPARKLE,
                summary
            ));
        } else {
            self.print_line(format!(
                "\n{} Plan finished with problems: {}\n",
                CROSS,
                summary
            ));
        }
    }
}
