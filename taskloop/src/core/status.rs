//! Task status transitions.
//!
//! Statuses only move forward along `started -> executing -> completed -> final`;
//! no step may be skipped and nothing re-enters an earlier status.

use anyhow::{Result, bail};

use crate::core::types::{Task, TaskStatus};

/// Returns true if `from -> to` is a legal single-step transition.
pub fn is_forward_step(from: TaskStatus, to: TaskStatus) -> bool {
    matches!(
        (from, to),
        (TaskStatus::Started, TaskStatus::Executing)
            | (TaskStatus::Executing, TaskStatus::Completed)
            | (TaskStatus::Completed, TaskStatus::Final)
    )
}

/// Move `task` to `next`, rejecting regressions and skips.
pub fn advance(task: &mut Task, next: TaskStatus) -> Result<()> {
    if !is_forward_step(task.status, next) {
        bail!(
            "illegal status transition for task '{}': {} -> {}",
            task.id,
            task.status.as_str(),
            next.as_str()
        );
    }
    task.status = next;
    Ok(())
}

/// Mark a task completed and attach its result.
pub fn complete(task: &mut Task, result: Option<String>) -> Result<()> {
    advance(task, TaskStatus::Completed)?;
    task.result = result;
    Ok(())
}
