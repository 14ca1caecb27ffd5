//! Execution backend abstraction.
//!
//! The [`ExecutionBackend`] trait decouples the execution loop from whatever
//! performs decomposition, analysis and execution (usually a language model).
//! [`CommandBackend`] drives an external command once per operation; tests use
//! scripted backends that return queued responses without spawning processes.
//!
//! Every call blocks until the backend answers. The loop imposes no timeout of
//! its own; `CommandBackend` enforces `backend.timeout_secs` per process.

use std::process::Command;
use std::time::Duration;

use jsonschema::{Validator, validator_for};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::error::{BackendError, FailureKind};
use crate::core::types::{Analysis, TaskContext};
use crate::io::config::{BackendConfig, ModelSettings};
use crate::io::process::{ProcessOutput, run_with_timeout};
use crate::io::prompt::{Operation, PromptBuilder, PromptInputs};

const TASK_LIST_SCHEMA: &str = include_str!("../../schemas/task_list.schema.json");
const ANALYSIS_SCHEMA: &str = include_str!("../../schemas/analysis.schema.json");
const EXECUTION_SCHEMA: &str = include_str!("../../schemas/execution.schema.json");

/// Run-level settings forwarded with goal decomposition.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub model: ModelSettings,
    pub max_loops: u32,
    pub web_search: bool,
}

/// Performs the model-backed work the loop orchestrates.
pub trait ExecutionBackend {
    /// Decompose `goal` into the initial task values.
    fn initial_tasks(
        &self,
        goal: &str,
        settings: &BackendSettings,
    ) -> Result<Vec<String>, BackendError>;

    /// Pick a strategy for `task`.
    fn analyze_task(&self, goal: &str, task: &str) -> Result<Analysis, BackendError>;

    /// Execute `task` with the chosen strategy and return its result text.
    fn execute_task(
        &self,
        goal: &str,
        task: &str,
        analysis: &Analysis,
    ) -> Result<String, BackendError>;

    /// Derive follow-up task values from a completed task.
    fn additional_tasks(
        &self,
        goal: &str,
        context: &TaskContext<'_>,
        prior_result: &str,
    ) -> Result<Vec<String>, BackendError>;
}

#[derive(Debug, Deserialize)]
struct TaskListOutput {
    tasks: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExecutionOutput {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    status: Option<u16>,
    message: String,
}

/// Backend that spawns `backend.command` once per operation.
///
/// The rendered prompt is written to stdin; the operation name and model
/// settings travel as `TASKLOOP_*` environment variables. Goal decomposition
/// uses the run's [`BackendSettings`] and additionally exports
/// `TASKLOOP_MAX_LOOPS` and `TASKLOOP_WEB_SEARCH`; every other operation uses
/// the model settings the backend was built with. Stdout must be a
/// JSON document matching the operation's schema, or on failure
/// `{"error": {"status": N, "message": "..."}}` with a non-zero exit.
pub struct CommandBackend {
    config: BackendConfig,
    model: ModelSettings,
    prompts: PromptBuilder,
    task_list_schema: Validator,
    analysis_schema: Validator,
    execution_schema: Validator,
}

impl CommandBackend {
    pub fn new(config: BackendConfig, model: ModelSettings) -> anyhow::Result<Self> {
        Ok(Self {
            prompts: PromptBuilder::new(config.prompt_budget_bytes),
            task_list_schema: compile_schema(TASK_LIST_SCHEMA)?,
            analysis_schema: compile_schema(ANALYSIS_SCHEMA)?,
            execution_schema: compile_schema(EXECUTION_SCHEMA)?,
            config,
            model,
        })
    }

    #[instrument(skip_all, fields(operation = operation.as_str()))]
    fn invoke<T: DeserializeOwned>(
        &self,
        operation: Operation,
        inputs: &PromptInputs<'_>,
        schema: &Validator,
        model: &ModelSettings,
        extra_env: &[(&str, String)],
    ) -> Result<T, BackendError> {
        let prompt = self
            .prompts
            .build(operation, inputs)
            .map_err(|err| BackendError::new(FailureKind::Protocol, format!("{err:#}")))?;

        let (program, args) = self.config.command.split_first().ok_or_else(|| {
            BackendError::new(FailureKind::Process, "backend.command is empty")
        })?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("TASKLOOP_OPERATION", operation.as_str())
            .env("TASKLOOP_MODEL", &model.name)
            .env("TASKLOOP_TEMPERATURE", model.temperature.to_string())
            .env("TASKLOOP_MAX_TOKENS", model.max_tokens.to_string())
            .env("TASKLOOP_LANGUAGE", &model.language)
            .envs(extra_env.iter().map(|(key, value)| (*key, value)));

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = run_with_timeout(
            cmd,
            prompt.as_bytes(),
            timeout,
            self.config.output_limit_bytes,
        )
        .map_err(|err| BackendError::new(FailureKind::Process, format!("{err:#}")))?;

        let value = interpret_output(&output, timeout)?;
        validate(schema, &value)?;
        let parsed = serde_json::from_value(value).map_err(|err| {
            BackendError::new(FailureKind::Protocol, format!("decode backend output: {err}"))
        })?;
        debug!("backend call succeeded");
        Ok(parsed)
    }
}

impl ExecutionBackend for CommandBackend {
    fn initial_tasks(
        &self,
        goal: &str,
        settings: &BackendSettings,
    ) -> Result<Vec<String>, BackendError> {
        let inputs = PromptInputs {
            goal,
            language: &settings.model.language,
            ..PromptInputs::default()
        };
        let extra_env = [
            ("TASKLOOP_MAX_LOOPS", settings.max_loops.to_string()),
            ("TASKLOOP_WEB_SEARCH", settings.web_search.to_string()),
        ];
        let output: TaskListOutput = self.invoke(
            Operation::StartGoal,
            &inputs,
            &self.task_list_schema,
            &settings.model,
            &extra_env,
        )?;
        Ok(output.tasks)
    }

    fn analyze_task(&self, goal: &str, task: &str) -> Result<Analysis, BackendError> {
        let inputs = PromptInputs {
            goal,
            language: &self.model.language,
            task: Some(task),
            ..PromptInputs::default()
        };
        self.invoke(
            Operation::AnalyzeTask,
            &inputs,
            &self.analysis_schema,
            &self.model,
            &[],
        )
    }

    fn execute_task(
        &self,
        goal: &str,
        task: &str,
        analysis: &Analysis,
    ) -> Result<String, BackendError> {
        let inputs = PromptInputs {
            goal,
            language: &self.model.language,
            task: Some(task),
            analysis: Some(analysis),
            ..PromptInputs::default()
        };
        let output: ExecutionOutput = self.invoke(
            Operation::ExecuteTask,
            &inputs,
            &self.execution_schema,
            &self.model,
            &[],
        )?;
        Ok(output.result)
    }

    fn additional_tasks(
        &self,
        goal: &str,
        context: &TaskContext<'_>,
        prior_result: &str,
    ) -> Result<Vec<String>, BackendError> {
        let inputs = PromptInputs {
            goal,
            language: &self.model.language,
            task: Some(context.current),
            analysis: None,
            result: Some(prior_result),
            remaining: context.remaining,
            completed: context.completed,
        };
        let output: TaskListOutput = self.invoke(
            Operation::CreateTasks,
            &inputs,
            &self.task_list_schema,
            &self.model,
            &[],
        )?;
        Ok(output.tasks)
    }
}

fn compile_schema(raw: &str) -> anyhow::Result<Validator> {
    let schema: Value = serde_json::from_str(raw)?;
    validator_for(&schema).map_err(|err| anyhow::anyhow!("invalid bundled schema: {err}"))
}

/// Turn a finished process into a JSON document or a typed failure.
fn interpret_output(output: &ProcessOutput, timeout: Duration) -> Result<Value, BackendError> {
    if output.timed_out {
        warn!(timeout_secs = timeout.as_secs(), "backend call timed out");
        return Err(BackendError::new(
            FailureKind::Timeout,
            format!("backend timed out after {timeout:?}"),
        ));
    }

    let stdout = output.stdout_text();
    if !output.status.success() {
        warn!(exit_code = ?output.status.code(), "backend call failed");
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(stdout.trim()) {
            return Err(match envelope.error.status {
                Some(status) => BackendError::http(status, envelope.error.message),
                None => BackendError::new(FailureKind::Process, envelope.error.message),
            });
        }
        let stderr = output.stderr_text();
        let message = if stderr.is_empty() {
            format!("backend exited with status {:?}", output.status.code())
        } else {
            stderr
        };
        return Err(BackendError::new(FailureKind::Process, message));
    }

    serde_json::from_str(stdout.trim()).map_err(|err| {
        BackendError::new(FailureKind::Protocol, format!("parse backend output: {err}"))
    })
}

fn validate(schema: &Validator, value: &Value) -> Result<(), BackendError> {
    if schema.is_valid(value) {
        return Ok(());
    }
    let messages = schema
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(BackendError::new(
        FailureKind::Protocol,
        format!("backend output failed schema validation: {}", messages.join("; ")),
    ))
}
