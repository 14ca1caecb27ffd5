//! Deterministic selection logic for the task queue.

use crate::core::types::{Task, TaskStatus};

/// Tasks still waiting to run, in insertion order.
pub fn pending(tasks: &[Task]) -> Vec<&Task> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Started)
        .collect()
}

/// Oldest pending task (FIFO). Returns `None` when the queue is drained.
pub fn next_pending(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().find(|task| task.status == TaskStatus::Started)
}
