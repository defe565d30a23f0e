//! Deterministic, pure logic shared by the exploration workflow.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod ids;
pub mod phase;
pub mod progress;
pub mod selection;
pub mod session;
pub mod types;
