//! Deterministic, pure logic shared by the execution loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod error;
pub mod playback;
pub mod selector;
pub mod status;
pub mod types;
