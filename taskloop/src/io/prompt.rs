//! Prompt rendering for backend operations.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the byte budget, droppable sections are
//! removed first (oldest context first), then the last section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::types::Analysis;

const START_GOAL_TEMPLATE: &str = include_str!("prompts/start_goal.md");
const ANALYZE_TASK_TEMPLATE: &str = include_str!("prompts/analyze_task.md");
const EXECUTE_TASK_TEMPLATE: &str = include_str!("prompts/execute_task.md");
const CREATE_TASKS_TEMPLATE: &str = include_str!("prompts/create_tasks.md");

/// Sections removed to fit the budget, in this order.
const DROP_ORDER: [&str; 3] = ["completed", "remaining", "result"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker pattern should be valid")
});

/// Backend operation a prompt is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    StartGoal,
    AnalyzeTask,
    ExecuteTask,
    CreateTasks,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::StartGoal => "start_goal",
            Operation::AnalyzeTask => "analyze_task",
            Operation::ExecuteTask => "execute_task",
            Operation::CreateTasks => "create_tasks",
        }
    }
}

/// Values available to every template.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs<'a> {
    pub goal: &'a str,
    pub language: &'a str,
    pub task: Option<&'a str>,
    pub analysis: Option<&'a Analysis>,
    pub result: Option<&'a str>,
    pub remaining: &'a [String],
    pub completed: &'a [String],
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Renders operation prompts within a byte budget.
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("start_goal", START_GOAL_TEMPLATE),
            ("analyze_task", ANALYZE_TASK_TEMPLATE),
            ("execute_task", EXECUTE_TASK_TEMPLATE),
            ("create_tasks", CREATE_TASKS_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("bundled prompt templates should be valid");
        }
        Self { env, budget_bytes }
    }

    pub fn build(&self, operation: Operation, inputs: &PromptInputs<'_>) -> Result<String> {
        let template = self
            .env
            .get_template(operation.as_str())
            .with_context(|| format!("load {} template", operation.as_str()))?;
        let rendered = template
            .render(context! {
                goal => inputs.goal.trim(),
                language => inputs.language,
                task => inputs.task.map(str::trim),
                analysis => inputs.analysis,
                result => inputs.result.map(str::trim).filter(|s| !s.is_empty()),
                remaining => inputs.remaining,
                completed => inputs.completed,
            })
            .with_context(|| format!("render {} template", operation.as_str()))?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    let total = |secs: &[Section]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped prompt section for budget"
            );
            sections.remove(idx);
        }
    }

    if total(sections) <= budget {
        return;
    }
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(rest.iter().map(|s| s.content.len()).sum());
    if last.content.len() > allowed {
        const MARKER: &str = "\n[truncated]";
        let keep = allowed.saturating_sub(MARKER.len());
        last.content.truncate(floor_char_boundary(&last.content, keep));
        last.content.push_str(MARKER);
        debug!(section = %last.key, "truncated prompt section for budget");
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
