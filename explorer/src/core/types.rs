//! Shared data model for the exploration workflow.
//!
//! These types are the stable contract between the remote client adapters and
//! the workflow core. They carry no I/O and never change once received: plans
//! and proposals are replaced wholesale, never edited in place.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Host + device pair identifying the physical device under exploration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    pub host_name: String,
    pub device_id: String,
}

impl DeviceRef {
    pub fn new(host_name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            device_id: device_id.into(),
        }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host_name, self.device_id)
    }
}

/// Identity of one exploration session. Immutable for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTarget {
    pub tree_id: String,
    pub device: DeviceRef,
}

impl SessionTarget {
    pub fn new(tree_id: impl Into<String>, device: DeviceRef) -> Self {
        Self {
            tree_id: tree_id.into(),
            device,
        }
    }
}

/// Exploration depth bound, always within `Depth::MIN..=Depth::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Depth(u8);

impl Depth {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: u8) -> Result<Self, Rejection> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Rejection::DepthOutOfRange(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Depth {
    type Error = Rejection;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Depth> for u8 {
    fn from(depth: Depth) -> Self {
        depth.0
    }
}

/// Which exploration flow to request from the service.
///
/// The response tag decides the branch actually taken; this is only a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationMode {
    /// Plan, then create, validate and finalize structure.
    #[default]
    Incremental,
    /// Explore everything, then approve a selection of proposals.
    SingleShot,
}

/// The agent's declared intent after analysing the device's current screen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExplorationPlan {
    pub menu_type: String,
    pub strategy: String,
    pub predicted_depth: u32,
    pub reasoning: String,
    /// Ordered menu/screen identifiers discovered on the current screen.
    pub items: Vec<String>,
    /// Row grouping of `items`, only present for directional-pad navigation.
    pub lines: Option<Vec<Vec<String>>>,
    /// Reference to the captured screenshot used for review.
    pub screenshot: Option<String>,
}

/// Candidate screen that is not yet part of the persisted graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedNode {
    pub id: String,
    pub name: String,
    pub screen_type: String,
    pub reasoning: String,
}

/// Candidate transition between two nodes (proposed or existing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub reasoning: String,
}

/// Final proposals of a single-shot exploration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Proposals {
    pub nodes: Vec<ProposedNode>,
    pub edges: Vec<ProposedEdge>,
}

/// Terminal payload of a `start` exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorationOutcome {
    /// Incremental flow: a plan awaiting human approval.
    Plan(ExplorationPlan),
    /// Single-shot flow: every proposal, awaiting selection and approval.
    LegacyResult(Proposals),
}

/// Counts of temporary structure materialised by `continue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructureCounts {
    pub nodes_created: u32,
    pub edges_created: u32,
}

/// Validation counters over the created-but-unvalidated edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationProgress {
    pub current: u32,
    pub total: u32,
}

/// Result of replaying one edge on the device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationStep {
    pub has_more_items: bool,
    /// Server-reported counters, when the service sends them.
    pub progress: Option<ValidationProgress>,
    pub edge_id: Option<String>,
}

/// Receipt of a single-shot approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApprovalReceipt {
    pub nodes_added: u32,
    pub edges_added: u32,
}

/// Receipt of stripping the temporary marking from validated structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FinalizeReceipt {
    pub nodes_finalized: u32,
    pub edges_finalized: u32,
}

/// A command precondition that failed locally, without any remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The device is not locked and under active control.
    DeviceNotControlled(DeviceRef),
    DepthOutOfRange(u8),
    /// Approval was requested with nothing selected.
    EmptySelection,
    /// A selection toggle named an id that was never proposed.
    UnknownProposal(String),
    InvalidIdentifier { field: &'static str, value: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::DeviceNotControlled(device) => {
                write!(f, "device {device} is not locked and under control")
            }
            Rejection::DepthOutOfRange(depth) => write!(
                f,
                "depth must be between {} and {} (got {depth})",
                Depth::MIN,
                Depth::MAX
            ),
            Rejection::EmptySelection => write!(f, "select at least one node or edge to approve"),
            Rejection::UnknownProposal(id) => write!(f, "no proposal with id '{id}'"),
            Rejection::InvalidIdentifier { field, value } => {
                write!(f, "{field} must be [A-Za-z0-9._:-] only (got '{value}')")
            }
        }
    }
}

impl std::error::Error for Rejection {}
