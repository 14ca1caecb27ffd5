//! The execution loop: one agent driving one goal to completion.
//!
//! [`Agent::start`] bootstraps the task queue from the goal and then iterates
//! until the queue drains, the loop budget runs out, the backend fails during
//! bootstrap, or a stop is requested. Each iteration takes the oldest pending
//! task through `executing -> completed`, then asks the backend for follow-up
//! tasks; a task that yields none is marked `final`.
//!
//! The loop is strictly sequential. Its only suspension points are backend
//! calls and presentation pacing. Playback levers are read once per iteration,
//! so a stop or pause lands at the start of the next iteration and never
//! interrupts an in-flight backend call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use crate::core::budget::LoopBudget;
use crate::core::classifier::{classify, describe};
use crate::core::playback::{Gate, PlaybackControl, PlaybackController, PlaybackMode};
use crate::core::selector::{next_pending, pending};
use crate::core::status::{advance, complete};
use crate::core::types::{
    Analysis, ErrorKind, LoopState, Message, RunId, Task, TaskContext, TaskStatus,
};
use crate::io::backend::{BackendSettings, ExecutionBackend};
use crate::io::config::{AgentConfig, ModelSettings};
use crate::io::events::Observer;
use crate::io::store::TaskStore;

pub const COMPLETION_NOTICE: &str = "All tasks completed. Shutting down.";
pub const MANUAL_SHUTDOWN_NOTICE: &str = "Manually shutting down.";
pub const FOLLOW_UP_DEGRADED_NOTICE: &str =
    "Could not generate follow-up tasks for this task. Continuing with the remaining queue.";

static NEXT_RUN: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a new agent run.
fn next_run_id() -> RunId {
    RunId(format!("run-{}", NEXT_RUN.fetch_add(1, Ordering::Relaxed)))
}

/// Notice emitted when the loop budget is exhausted.
pub fn loop_limit_notice(max_loops: u32) -> String {
    format!(
        "This agent has reached its limit of {max_loops} loops and is shutting down. \
         Raise `max_loops` to let it run longer."
    )
}

/// Per-run options consumed by the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Iteration budget override; `None` uses the system default.
    pub max_loops: Option<u32>,
    pub web_search: bool,
    pub mode: PlaybackMode,
    pub initial_control: PlaybackControl,
    /// Presentation pause between materialized tasks.
    pub task_delay: Duration,
    pub model: ModelSettings,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl RunOptions {
    pub fn from_config(cfg: &AgentConfig) -> Self {
        Self {
            max_loops: cfg.max_loops,
            web_search: cfg.web_search,
            mode: cfg.mode,
            initial_control: cfg.initial_control,
            task_delay: Duration::from_millis(cfg.task_delay_ms),
            model: cfg.model.clone(),
        }
    }
}

/// Snapshot returned whenever the loop yields control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: LoopState,
    /// Full iterations executed so far.
    pub loop_count: u32,
}

/// Execution loop for a single goal.
pub struct Agent<B, S, O>
where
    B: ExecutionBackend,
    S: TaskStore + ?Sized,
    O: Observer,
{
    goal: String,
    run: RunId,
    options: RunOptions,
    budget: LoopBudget,
    backend: B,
    store: Arc<S>,
    observer: O,
    playback: PlaybackController,
    state: LoopState,
    loop_count: u32,
    completed_task_values: Vec<String>,
    shutdown_sent: bool,
}

impl<B, S, O> Agent<B, S, O>
where
    B: ExecutionBackend,
    S: TaskStore + ?Sized,
    O: Observer,
{
    pub fn new(
        goal: impl Into<String>,
        options: RunOptions,
        backend: B,
        store: Arc<S>,
        observer: O,
    ) -> Self {
        let playback = PlaybackController::new(options.mode, options.initial_control);
        Self {
            goal: goal.into(),
            run: next_run_id(),
            budget: LoopBudget::new(options.max_loops),
            options,
            backend,
            store,
            observer,
            playback,
            state: LoopState::Idle,
            loop_count: 0,
            completed_task_values: Vec::new(),
            shutdown_sent: false,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Owner of every task this agent appends to the store.
    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn completed_task_values(&self) -> &[String] {
        &self.completed_task_values
    }

    /// Handle for pausing, stepping or stopping the run from another thread.
    pub fn playback(&self) -> PlaybackController {
        self.playback.clone()
    }

    fn outcome(&self) -> RunOutcome {
        RunOutcome {
            state: self.state,
            loop_count: self.loop_count,
        }
    }

    /// Bootstrap the goal and run until the loop pauses or terminates.
    ///
    /// Only the first call bootstraps; later calls behave like [`Agent::resume`].
    #[instrument(skip_all, fields(goal = %self.goal, run_id = %self.run))]
    pub fn start(&mut self) -> RunOutcome {
        if self.state != LoopState::Idle {
            return self.resume();
        }
        if self.playback.is_stop_requested() {
            return self.shut_down_manually();
        }

        info!(max_loops = self.budget.max_loops(), mode = ?self.options.mode, "starting agent");
        self.state = LoopState::Running;
        self.playback.set_running(true);

        match self.bootstrap() {
            Ok(None) => self.drive(),
            Ok(Some(terminal)) => self.finish(terminal),
            Err(err) => self.fail_internal(&err),
        }
    }

    /// Re-enter `Running` after a pause or halt.
    ///
    /// In stepwise mode this authorizes exactly one more iteration.
    pub fn resume(&mut self) -> RunOutcome {
        if self.state.is_terminal() {
            return self.outcome();
        }
        if self.state == LoopState::Idle {
            return self.start();
        }
        if self.playback.mode() == PlaybackMode::Stepwise {
            self.playback.request_step();
        }
        self.playback.set_running(true);
        self.state = LoopState::Running;
        self.drive()
    }

    /// Terminal stop for an agent that is not inside [`Agent::start`]/[`Agent::resume`].
    ///
    /// To stop a run in progress on another thread, call
    /// [`PlaybackController::stop`] on the handle from [`Agent::playback`].
    pub fn stop(&mut self) -> RunOutcome {
        if self.state.is_terminal() {
            return self.outcome();
        }
        self.playback.stop();
        self.shut_down_manually()
    }

    fn emit(&self, message: Message) {
        self.observer.on_message(&message);
    }

    fn emit_task(&self, task: &Task) {
        self.emit(Message::task(task));
    }

    fn pace(&self, index: usize) {
        if index > 0 && !self.options.task_delay.is_zero() {
            thread::sleep(self.options.task_delay);
        }
    }

    /// Emit the goal, decompose it and materialize the initial queue.
    fn bootstrap(&mut self) -> Result<Option<LoopState>> {
        self.emit(Message::Goal {
            value: self.goal.clone(),
        });
        self.emit(Message::Thinking);

        let settings = BackendSettings {
            model: self.options.model.clone(),
            max_loops: self.budget.max_loops(),
            web_search: self.options.web_search,
        };
        let values = match self.backend.initial_tasks(&self.goal, &settings) {
            Ok(values) => values,
            Err(err) => {
                let kind = classify(&err);
                error!(?kind, status = ?err.status, err = %err, "goal decomposition failed");
                self.emit(Message::system(describe(kind, &err)));
                return Ok(Some(LoopState::Failed { kind }));
            }
        };

        debug!(count = values.len(), "materializing initial tasks");
        for (index, value) in values.iter().enumerate() {
            self.pace(index);
            let task = self.store.append(&self.run, value)?;
            self.emit_task(&task);
        }
        Ok(None)
    }

    fn drive(&mut self) -> RunOutcome {
        loop {
            match self.playback.checkpoint() {
                Gate::Proceed => {}
                Gate::Stop => return self.shut_down_manually(),
                Gate::Halt => {
                    debug!(loop_count = self.loop_count, "run flag cleared, halting");
                    self.state = LoopState::Paused;
                    return self.outcome();
                }
                Gate::Pause(control) => {
                    debug!(loop_count = self.loop_count, "waiting for next step");
                    self.state = LoopState::Paused;
                    self.observer.on_pause_entered(control);
                    return self.outcome();
                }
            }

            match self.iterate() {
                Ok(None) => {}
                Ok(Some(terminal)) => return self.finish(terminal),
                Err(err) => return self.fail_internal(&err),
            }
        }
    }

    /// One iteration. Returns the terminal state when the run must end.
    fn iterate(&mut self) -> Result<Option<LoopState>> {
        let tasks = self.store.list_run(&self.run)?;
        let Some(current) = next_pending(&tasks).cloned() else {
            self.emit(Message::system(COMPLETION_NOTICE));
            return Ok(Some(LoopState::Completed));
        };

        let next_count = self.loop_count + 1;
        if self.budget.is_exhausted(next_count) {
            self.emit(Message::system(loop_limit_notice(self.budget.max_loops())));
            return Ok(Some(LoopState::LoopLimitReached));
        }
        self.loop_count = next_count;
        debug!(task_id = %current.id, loop_count = self.loop_count, "running iteration");

        let executing = self
            .store
            .mutate(&current.id, &mut |task| advance(task, TaskStatus::Executing))?;
        self.emit_task(&executing);

        let analysis = self.analyze(&current.value);

        match self
            .backend
            .execute_task(&self.goal, &current.value, &analysis)
        {
            Ok(result) => {
                let completed = self
                    .store
                    .mutate(&current.id, &mut |task| complete(task, Some(result.clone())))?;
                self.emit_task(&completed);
                self.completed_task_values.push(current.value.clone());

                if self.expand(&current, &result)? == 0 {
                    self.mark_final(&current)?;
                }
            }
            Err(err) => {
                let kind = classify(&err);
                warn!(task_id = %current.id, ?kind, err = %err, "task execution failed");
                self.emit(Message::system(describe(kind, &err)));
                let completed = self
                    .store
                    .mutate(&current.id, &mut |task| complete(task, None))?;
                self.emit_task(&completed);
                self.mark_final(&current)?;
            }
        }

        Ok(None)
    }

    fn analyze(&self, value: &str) -> Analysis {
        if !self.options.web_search {
            return Analysis::reason();
        }
        match self.backend.analyze_task(&self.goal, value) {
            Ok(analysis) => {
                self.emit(Message::system(analysis.narration()));
                analysis
            }
            Err(err) => {
                let kind = classify(&err);
                warn!(?kind, err = %err, "task analysis failed, reasoning instead");
                self.emit(Message::system(format!(
                    "{} Falling back to reasoning.",
                    describe(kind, &err)
                )));
                Analysis::reason()
            }
        }
    }

    /// Ask for follow-up tasks and append them. Returns how many were created.
    fn expand(&self, current: &Task, result: &str) -> Result<usize> {
        let tasks = self.store.list_run(&self.run)?;
        let remaining: Vec<String> = pending(&tasks)
            .into_iter()
            .filter(|task| task.id != current.id)
            .map(|task| task.value.clone())
            .collect();
        let context = TaskContext {
            current: &current.value,
            remaining: &remaining,
            completed: &self.completed_task_values,
        };

        let values = match self.backend.additional_tasks(&self.goal, &context, result) {
            Ok(values) => values,
            Err(err) => {
                let kind = classify(&err);
                warn!(task_id = %current.id, ?kind, err = %err, "follow-up generation failed");
                self.emit(Message::system(format!(
                    "{FOLLOW_UP_DEGRADED_NOTICE} {}",
                    describe(kind, &err)
                )));
                return Ok(0);
            }
        };

        for (index, value) in values.iter().enumerate() {
            self.pace(index);
            let task = self.store.append(&self.run, value)?;
            self.emit_task(&task);
        }
        Ok(values.len())
    }

    fn mark_final(&self, current: &Task) -> Result<()> {
        let finalized = self
            .store
            .mutate(&current.id, &mut |task| advance(task, TaskStatus::Final))?;
        self.emit_task(&finalized);
        Ok(())
    }

    fn shut_down_manually(&mut self) -> RunOutcome {
        self.emit(Message::system(MANUAL_SHUTDOWN_NOTICE));
        self.finish(LoopState::Stopped)
    }

    fn fail_internal(&mut self, err: &anyhow::Error) -> RunOutcome {
        error!(err = %format!("{err:#}"), "agent loop failed");
        self.emit(Message::system(format!("ERROR: {err:#}")));
        self.finish(LoopState::Failed {
            kind: ErrorKind::Unclassified,
        })
    }

    /// Enter a terminal state and notify the owner exactly once.
    fn finish(&mut self, terminal: LoopState) -> RunOutcome {
        self.state = terminal;
        self.playback.set_running(false);
        if !self.shutdown_sent {
            self.shutdown_sent = true;
            info!(state = ?terminal, loop_count = self.loop_count, "agent shut down");
            self.observer.on_shutdown();
        }
        self.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::BackendError;
    use crate::io::store::InMemoryTaskStore;
    use crate::test_support::{RecordingObserver, ScriptedBackend};

    fn agent(
        backend: ScriptedBackend,
        options: RunOptions,
    ) -> (
        Agent<ScriptedBackend, InMemoryTaskStore, RecordingObserver>,
        Arc<InMemoryTaskStore>,
        RecordingObserver,
    ) {
        let store = Arc::new(InMemoryTaskStore::new());
        let observer = RecordingObserver::new();
        let agent = Agent::new(
            "Plan a trip",
            options,
            backend,
            Arc::clone(&store),
            observer.clone(),
        );
        (agent, store, observer)
    }

    #[test]
    fn bootstrap_emits_goal_then_thinking() {
        let backend = ScriptedBackend::new().initial(vec!["Book flight"]);
        let (mut agent, _store, observer) = agent(backend, RunOptions::default());
        agent.start();
        let messages = observer.messages();
        assert_eq!(
            messages[0],
            Message::Goal {
                value: "Plan a trip".to_string()
            }
        );
        assert_eq!(messages[1], Message::Thinking);
    }

    #[test]
    fn stop_before_start_skips_bootstrap() {
        let backend = ScriptedBackend::new().initial(vec!["Book flight"]);
        let (mut agent, store, observer) = agent(backend.clone(), RunOptions::default());
        agent.playback().stop();
        let outcome = agent.start();
        assert_eq!(outcome.state, LoopState::Stopped);
        assert!(backend.calls().is_empty());
        assert!(store.list().expect("list").is_empty());
        assert_eq!(observer.shutdowns(), 1);
    }

    #[test]
    fn analysis_failure_falls_back_to_reasoning() {
        let backend = ScriptedBackend::new()
            .initial(vec!["Book flight"])
            .analysis_error(BackendError::http(500, "analysis down"));
        let options = RunOptions {
            web_search: true,
            ..RunOptions::default()
        };
        let (mut agent, _store, observer) = agent(backend.clone(), options);
        let outcome = agent.start();
        assert_eq!(outcome.state, LoopState::Completed);
        assert!(
            observer
                .system_texts()
                .iter()
                .any(|text| text.ends_with("Falling back to reasoning."))
        );
        assert_eq!(backend.executed_actions(), vec![crate::core::types::AnalysisAction::Reason]);
    }

    #[test]
    fn terminal_agent_ignores_resume_and_stop() {
        let backend = ScriptedBackend::new().initial(Vec::<&str>::new());
        let (mut agent, _store, observer) = agent(backend, RunOptions::default());
        assert_eq!(agent.start().state, LoopState::Completed);
        assert_eq!(agent.resume().state, LoopState::Completed);
        assert_eq!(agent.stop().state, LoopState::Completed);
        assert_eq!(observer.shutdowns(), 1);
    }
}
