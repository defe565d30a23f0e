//! Side-effecting adapters: config files, the exploration service, device
//! control and session reports.

pub mod client;
pub mod config;
pub mod device;
pub mod report;
pub mod wire;
