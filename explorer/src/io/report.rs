//! End-of-session report written by `explorer explore --report PATH`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::phase::Phase;
use crate::core::types::{DeviceRef, ExplorationMode, StructureCounts, ValidationProgress};
use crate::workflow::WorkflowView;

/// Summary of one exploration session, serialized as pretty JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionReport {
    pub tree_id: String,
    pub device: DeviceRef,
    pub mode: ExplorationMode,
    pub depth: Option<u8>,
    pub exploration_id: Option<String>,
    pub phase: Phase,
    pub error: Option<String>,
    pub plan: Option<PlanSummary>,
    pub proposals: Option<ProposalSummary>,
    pub structure: Option<StructureCounts>,
    pub validation: Option<ValidationProgress>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSummary {
    pub menu_type: String,
    pub strategy: String,
    pub predicted_depth: u32,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalSummary {
    pub nodes_proposed: usize,
    pub edges_proposed: usize,
    pub nodes_selected: usize,
    pub edges_selected: usize,
}

impl SessionReport {
    pub fn from_view(view: &WorkflowView, started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> Self {
        let plan = view.plan.as_ref().map(|plan| PlanSummary {
            menu_type: plan.menu_type.clone(),
            strategy: plan.strategy.clone(),
            predicted_depth: plan.predicted_depth,
            items: plan.items.clone(),
        });
        let proposals = view.proposals.as_ref().map(|proposals| {
            let selected = view
                .selection
                .as_ref()
                .map(|set| set.compute())
                .unwrap_or_default();
            ProposalSummary {
                nodes_proposed: proposals.nodes.len(),
                edges_proposed: proposals.edges.len(),
                nodes_selected: selected.node_ids.len(),
                edges_selected: selected.edge_ids.len(),
            }
        });
        Self {
            tree_id: view.target.tree_id.clone(),
            device: view.target.device.clone(),
            mode: view.mode,
            depth: view.depth.map(|depth| depth.get()),
            exploration_id: view.exploration_id.clone(),
            phase: view.phase,
            error: view.error.clone(),
            plan,
            proposals,
            structure: view.structure,
            validation: view.progress.validation,
            started_at,
            ended_at,
        }
    }
}

/// Atomically write the report to disk (temp file + rename).
pub fn write_report(path: &Path, report: &SessionReport) -> Result<()> {
    debug!(path = %path.display(), phase = %report.phase, "writing session report");
    let mut buf = serde_json::to_string_pretty(report).context("serialize session report")?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::Progress;
    use crate::core::selection::SelectionSet;
    use crate::core::types::{Proposals, ProposedNode, SessionTarget};

    fn view() -> WorkflowView {
        let proposals = Proposals {
            nodes: ["home", "live"]
                .into_iter()
                .map(|id| ProposedNode {
                    id: id.to_string(),
                    name: id.to_string(),
                    screen_type: "menu".to_string(),
                    reasoning: String::new(),
                })
                .collect(),
            edges: Vec::new(),
        };
        let mut selection = SelectionSet::all_included(&proposals);
        selection.toggle_node("live");
        WorkflowView {
            target: SessionTarget::new("tree-1", DeviceRef::new("host-a", "device1")),
            mode: ExplorationMode::SingleShot,
            phase: Phase::Committed,
            error: None,
            depth: None,
            exploration_id: Some("exp-9".to_string()),
            plan: None,
            proposals: Some(proposals),
            selection: Some(selection),
            structure: None,
            progress: Progress::default(),
            in_flight: false,
        }
    }

    #[test]
    fn summarizes_selection_counts() {
        let now = Utc::now();
        let report = SessionReport::from_view(&view(), now, now);
        assert_eq!(
            report.proposals,
            Some(ProposalSummary {
                nodes_proposed: 2,
                edges_proposed: 0,
                nodes_selected: 1,
                edges_selected: 0,
            })
        );
        assert_eq!(report.phase, Phase::Committed);
    }

    #[test]
    fn write_report_creates_parent_and_replaces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reports").join("session.json");
        let now = Utc::now();
        let report = SessionReport::from_view(&view(), now, now);

        write_report(&path, &report).expect("write");
        write_report(&path, &report).expect("overwrite");

        let raw = fs::read_to_string(&path).expect("read");
        let parsed: SessionReport = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, report);
        assert!(raw.contains("\"phase\": \"committed\""));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
