//! Test-only doubles for the execution backend and the event sink.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::error::BackendError;
use crate::core::playback::PlaybackControl;
use crate::core::types::{Analysis, AnalysisAction, Message, TaskContext};
use crate::io::backend::{BackendSettings, ExecutionBackend};
use crate::io::events::Observer;

/// Backend call recorded by [`ScriptedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Initial {
        goal: String,
        max_loops: u32,
    },
    Analyze {
        task: String,
    },
    Execute {
        task: String,
        action: AnalysisAction,
    },
    FollowUp {
        current: String,
        remaining: Vec<String>,
        completed: Vec<String>,
        prior_result: String,
    },
}

type ExecuteHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Script {
    initial: Option<Result<Vec<String>, BackendError>>,
    analyses: VecDeque<Result<Analysis, BackendError>>,
    executions: HashMap<String, Result<String, BackendError>>,
    follow_ups: HashMap<String, Result<Vec<String>, BackendError>>,
    calls: Vec<BackendCall>,
    on_execute: Option<ExecuteHook>,
}

/// Backend returning predetermined responses without spawning processes.
///
/// Unscripted calls succeed: execution returns `"done: <task>"`, analysis
/// picks `reason`, follow-up generation returns no tasks. Clones share the
/// same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn initial<T: Into<String>>(self, values: Vec<T>) -> Self {
        self.script().initial = Some(Ok(values.into_iter().map(Into::into).collect()));
        self
    }

    pub fn initial_error(self, err: BackendError) -> Self {
        self.script().initial = Some(Err(err));
        self
    }

    pub fn analysis(self, analysis: Analysis) -> Self {
        self.script().analyses.push_back(Ok(analysis));
        self
    }

    pub fn analysis_error(self, err: BackendError) -> Self {
        self.script().analyses.push_back(Err(err));
        self
    }

    pub fn execution(self, task: &str, result: &str) -> Self {
        self.script()
            .executions
            .insert(task.to_string(), Ok(result.to_string()));
        self
    }

    pub fn execution_error(self, task: &str, err: BackendError) -> Self {
        self.script().executions.insert(task.to_string(), Err(err));
        self
    }

    pub fn follow_ups<T: Into<String>>(self, task: &str, values: Vec<T>) -> Self {
        self.script().follow_ups.insert(
            task.to_string(),
            Ok(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn follow_up_error(self, task: &str, err: BackendError) -> Self {
        self.script().follow_ups.insert(task.to_string(), Err(err));
        self
    }

    /// Run `hook` with the task value whenever a task is executed.
    pub fn on_execute(self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.script().on_execute = Some(Arc::new(hook));
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.script().calls.clone()
    }

    pub fn executed_tasks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Execute { task, .. } => Some(task),
                _ => None,
            })
            .collect()
    }

    pub fn executed_actions(&self) -> Vec<AnalysisAction> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Execute { action, .. } => Some(action),
                _ => None,
            })
            .collect()
    }
}

impl ExecutionBackend for ScriptedBackend {
    fn initial_tasks(
        &self,
        goal: &str,
        settings: &BackendSettings,
    ) -> Result<Vec<String>, BackendError> {
        let mut script = self.script();
        script.calls.push(BackendCall::Initial {
            goal: goal.to_string(),
            max_loops: settings.max_loops,
        });
        script.initial.clone().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn analyze_task(&self, _goal: &str, task: &str) -> Result<Analysis, BackendError> {
        let mut script = self.script();
        script.calls.push(BackendCall::Analyze {
            task: task.to_string(),
        });
        script
            .analyses
            .pop_front()
            .unwrap_or_else(|| Ok(Analysis::reason()))
    }

    fn execute_task(
        &self,
        _goal: &str,
        task: &str,
        analysis: &Analysis,
    ) -> Result<String, BackendError> {
        let (hook, response) = {
            let mut script = self.script();
            script.calls.push(BackendCall::Execute {
                task: task.to_string(),
                action: analysis.action,
            });
            let response = script
                .executions
                .get(task)
                .cloned()
                .unwrap_or_else(|| Ok(format!("done: {task}")));
            (script.on_execute.clone(), response)
        };
        if let Some(hook) = hook {
            hook(task);
        }
        response
    }

    fn additional_tasks(
        &self,
        _goal: &str,
        context: &TaskContext<'_>,
        prior_result: &str,
    ) -> Result<Vec<String>, BackendError> {
        let mut script = self.script();
        script.calls.push(BackendCall::FollowUp {
            current: context.current.to_string(),
            remaining: context.remaining.to_vec(),
            completed: context.completed.to_vec(),
            prior_result: prior_result.to_string(),
        });
        script
            .follow_ups
            .get(context.current)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Debug, Default)]
struct Recorded {
    messages: Vec<Message>,
    shutdowns: usize,
    pauses: Vec<PlaybackControl>,
}

/// Observer that records everything it receives. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.recorded().messages.clone()
    }

    pub fn system_texts(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                Message::System { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn shutdowns(&self) -> usize {
        self.recorded().shutdowns
    }

    pub fn pauses(&self) -> Vec<PlaybackControl> {
        self.recorded().pauses.clone()
    }
}

impl Observer for RecordingObserver {
    fn on_message(&self, message: &Message) {
        self.recorded().messages.push(message.clone());
    }

    fn on_shutdown(&self) {
        self.recorded().shutdowns += 1;
    }

    fn on_pause_entered(&self, control: PlaybackControl) {
        self.recorded().pauses.push(control);
    }
}

/// Write `contents` to a config file inside a fresh temp directory.
pub fn temp_config(contents: &str) -> std::io::Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("taskloop.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}
