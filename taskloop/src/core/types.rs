//! Shared deterministic types for the execution loop.
//!
//! These types define stable contracts between the loop, the task store and
//! the event sinks. They carry no I/O and serialize to a stable JSON shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque task identity assigned by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one agent run. Tasks are owned by the run that created them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a task. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Started,
    Executing,
    Completed,
    /// Terminal marker on a completed task that produced no follow-ups.
    Final,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Started => "started",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Final => "final",
        }
    }
}

/// One unit of work toward the goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub run: RunId,
    pub value: String,
    pub status: TaskStatus,
    pub result: Option<String>,
}

/// Strategy the backend picked for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisAction {
    Reason,
    Search,
}

/// Per-task strategy analysis returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub reasoning: String,
    pub action: AnalysisAction,
    pub arg: String,
}

impl Analysis {
    /// Strategy used when web-search augmentation is disabled.
    pub fn reason() -> Self {
        Self {
            reasoning: String::new(),
            action: AnalysisAction::Reason,
            arg: String::new(),
        }
    }

    /// Human-readable narration emitted before execution.
    pub fn narration(&self) -> String {
        match self.action {
            AnalysisAction::Search => format!("Searching the web for \"{}\"...", self.arg),
            AnalysisAction::Reason => {
                if self.reasoning.trim().is_empty() {
                    "Reasoning about the task...".to_string()
                } else {
                    format!("Reasoning: {}", self.reasoning.trim())
                }
            }
        }
    }
}

/// Classified failure taxonomy for backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    QuotaExceeded,
    AuthFailure,
    TransientBackendFailure,
    Unclassified,
}

/// Lifecycle event delivered to the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Goal {
        value: String,
    },
    Thinking,
    Task {
        id: TaskId,
        value: String,
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    System {
        text: String,
    },
}

impl Message {
    pub fn task(task: &Task) -> Self {
        Message::Task {
            id: task.id.clone(),
            value: task.value.clone(),
            status: task.status,
            result: task.result.clone(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Message::System { text: text.into() }
    }
}

/// Execution-loop state machine.
///
/// `Completed`, `Stopped`, `LoopLimitReached` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
    LoopLimitReached,
    Failed { kind: ErrorKind },
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoopState::Completed
                | LoopState::Stopped
                | LoopState::LoopLimitReached
                | LoopState::Failed { .. }
        )
    }
}

/// Snapshot of the queue handed to follow-up generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskContext<'a> {
    /// Value of the task that just completed.
    pub current: &'a str,
    /// Pending task values, excluding `current`.
    pub remaining: &'a [String],
    /// Every completed task value, oldest first.
    pub completed: &'a [String],
}
