//! Task store abstraction.
//!
//! The loop only appends tasks, lists them and mutates them in place through
//! [`TaskStore`]. Implementations must give read-your-writes consistency and
//! tolerate several agents sharing one store. Every task belongs to the run
//! that appended it, and an agent only ever sees its own run's tasks.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::core::types::{RunId, Task, TaskId, TaskStatus};

/// Ordered mapping from task identity to task state.
pub trait TaskStore: Send + Sync {
    /// Create a new `Started` task owned by `run` at the end of the queue.
    fn append(&self, run: &RunId, value: &str) -> Result<Task>;

    /// Every task of every run, in insertion order.
    fn list(&self) -> Result<Vec<Task>>;

    /// Tasks owned by `run`, in insertion order.
    fn list_run(&self, run: &RunId) -> Result<Vec<Task>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|task| &task.run == run)
            .collect())
    }

    /// Tasks owned by `run` with `status`, in insertion order.
    fn list_by_status(&self, run: &RunId, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .list_run(run)?
            .into_iter()
            .filter(|task| task.status == status)
            .collect())
    }

    /// Apply `update` to the task with `id` and return the updated task.
    ///
    /// If `update` fails the stored task is left unchanged.
    fn mutate(
        &self,
        id: &TaskId,
        update: &mut dyn FnMut(&mut Task) -> Result<()>,
    ) -> Result<Task>;
}

#[derive(Debug, Default)]
struct Inner {
    tasks: Vec<Task>,
    next_id: u64,
}

/// Process-local store guarded by a mutex.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: Mutex<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("task store lock poisoned"))
    }
}

impl TaskStore for InMemoryTaskStore {
    fn append(&self, run: &RunId, value: &str) -> Result<Task> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let task = Task {
            id: TaskId(format!("task-{}", inner.next_id)),
            run: run.clone(),
            value: value.to_string(),
            status: TaskStatus::Started,
            result: None,
        };
        debug!(task_id = %task.id, run_id = %run, "appended task");
        inner.tasks.push(task.clone());
        Ok(task)
    }

    fn list(&self) -> Result<Vec<Task>> {
        Ok(self.lock()?.tasks.clone())
    }

    fn mutate(
        &self,
        id: &TaskId,
        update: &mut dyn FnMut(&mut Task) -> Result<()>,
    ) -> Result<Task> {
        let mut inner = self.lock()?;
        let slot = inner
            .tasks
            .iter_mut()
            .find(|task| &task.id == id)
            .ok_or_else(|| anyhow!("unknown task '{id}'"))?;
        let mut updated = slot.clone();
        update(&mut updated)?;
        *slot = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::advance;
    use std::sync::Arc;
    use std::thread;

    fn run(name: &str) -> RunId {
        RunId(name.to_string())
    }

    #[test]
    fn append_assigns_unique_ids_in_order() {
        let store = InMemoryTaskStore::new();
        let a = store.append(&run("run-1"), "Book flight").expect("append");
        let b = store.append(&run("run-1"), "Book hotel").expect("append");
        assert_ne!(a.id, b.id);
        let values: Vec<String> = store
            .list()
            .expect("list")
            .into_iter()
            .map(|t| t.value)
            .collect();
        assert_eq!(values, vec!["Book flight", "Book hotel"]);
    }

    #[test]
    fn failed_mutation_leaves_task_untouched() {
        let store = InMemoryTaskStore::new();
        let task = store.append(&run("run-1"), "Book flight").expect("append");
        let err = store
            .mutate(&task.id, &mut |t| advance(t, TaskStatus::Final))
            .unwrap_err();
        assert!(err.to_string().contains("illegal status transition"));
        let pending = store.list_by_status(&run("run-1"), TaskStatus::Started).expect("list");
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn mutate_unknown_task_errors() {
        let store = InMemoryTaskStore::new();
        let err = store
            .mutate(&TaskId("task-9".to_string()), &mut |_| Ok(()))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown task 'task-9'");
    }

    #[test]
    fn concurrent_appends_keep_ids_unique() {
        let store = Arc::new(InMemoryTaskStore::new());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let owner = run(&format!("run-{n}"));
                    for i in 0..25 {
                        store
                            .append(&owner, &format!("agent {n} task {i}"))
                            .expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        let mut ids: Vec<String> = store
            .list()
            .expect("list")
            .into_iter()
            .map(|t| t.id.0)
            .collect();
        assert_eq!(ids.len(), 100);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn runs_only_see_their_own_tasks() {
        let store = InMemoryTaskStore::new();
        store.append(&run("run-1"), "Book flight").expect("append");
        store.append(&run("run-2"), "Buy groceries").expect("append");
        store.append(&run("run-1"), "Book hotel").expect("append");

        let trip: Vec<String> = store
            .list_by_status(&run("run-1"), TaskStatus::Started)
            .expect("list")
            .into_iter()
            .map(|t| t.value)
            .collect();
        assert_eq!(trip, vec!["Book flight", "Book hotel"]);
        assert_eq!(store.list_run(&run("run-2")).expect("list").len(), 1);
        assert_eq!(store.list().expect("list").len(), 3);
    }
}
