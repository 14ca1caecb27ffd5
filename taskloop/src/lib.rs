//! Autonomous task-execution agent loop.
//!
//! Given a goal, the agent asks a backend to decompose it into tasks, executes
//! the oldest pending task, derives follow-up tasks from the result, and keeps
//! going until the queue drains, the loop budget runs out, or it is stopped.
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (task statuses, selection, loop
//!   budget, error classification, playback control). No I/O.
//! - **[`io`]**: Collaborators with side effects (task store, command backend,
//!   prompts, event sinks, configuration).
//!
//! [`agent`] ties them together into the execution-loop state machine.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
