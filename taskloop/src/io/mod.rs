//! I/O collaborators of the execution loop.

pub mod backend;
pub mod config;
pub mod events;
pub mod process;
pub mod prompt;
pub mod store;
