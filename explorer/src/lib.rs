//! Client-side orchestration of AI-guided navigation-graph exploration.
//!
//! An exploration service analyses a device's screens and proposes screens
//! (nodes) and transitions (edges). This crate drives that service through a
//! phase machine that gates every graph mutation behind approval and replays
//! each created edge on the device before it is made permanent.
//!
//! - **[`core`]**: Pure, deterministic logic (phases, progress, selection, session).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (config files, the HTTP service, device
//!   control, reports). Behind traits so tests can substitute doubles.
//!
//! [`workflow`] and [`looping`] coordinate the two to implement the commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
