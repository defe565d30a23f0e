//! Device-control collaborator.
//!
//! Exploration drives a physical device, so `start` (and a retried start) is
//! only issued while the device is locked and under active control by this
//! operator. Lock acquisition itself lives outside the explorer.

use async_trait::async_trait;
use tracing::debug;

use crate::core::types::DeviceRef;

#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// True when `device` is locked and controlled by the current operator.
    async fn is_under_control(&self, device: &DeviceRef) -> bool;
}

/// Control state declared by the operator on the command line (`--lock-held`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclaredLock {
    held: bool,
}

impl DeclaredLock {
    pub fn new(held: bool) -> Self {
        Self { held }
    }
}

#[async_trait]
impl DeviceControl for DeclaredLock {
    async fn is_under_control(&self, device: &DeviceRef) -> bool {
        debug!(%device, held = self.held, "device control check");
        self.held
    }
}
