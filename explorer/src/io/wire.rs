//! JSON payloads exchanged with the exploration service.
//!
//! Every reply shares an envelope (`success`, `error`) and is normalised here
//! into the core types. Decoding is kept free of networking so that it can be
//! tested against captured payloads.

use anyhow::{Result, anyhow};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::progress::{ProgressUpdate, ScreenAnalysis};
use crate::core::selection::Selection;
use crate::core::types::{
    ApprovalReceipt, ExplorationMode, ExplorationOutcome, ExplorationPlan, FinalizeReceipt,
    Proposals, ProposedEdge, ProposedNode, SessionTarget, StructureCounts, ValidationProgress,
    ValidationStep,
};

/// Longest slice of a non-JSON error body quoted in error messages.
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Serialize)]
pub struct SessionBody<'a> {
    pub tree_id: &'a str,
    pub host_name: &'a str,
    pub device_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploration_id: Option<&'a str>,
}

impl<'a> SessionBody<'a> {
    pub fn new(target: &'a SessionTarget, exploration_id: Option<&'a str>) -> Self {
        Self {
            tree_id: &target.tree_id,
            host_name: &target.device.host_name,
            device_id: &target.device.device_id,
            exploration_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartBody<'a> {
    #[serde(flatten)]
    pub session: SessionBody<'a>,
    pub exploration_depth: u8,
    pub mode: ExplorationMode,
}

#[derive(Debug, Serialize)]
pub struct ApproveBody<'a> {
    #[serde(flatten)]
    pub session: SessionBody<'a>,
    pub approved_nodes: &'a [String],
    pub approved_edges: &'a [String],
}

impl<'a> ApproveBody<'a> {
    pub fn new(session: SessionBody<'a>, selection: &'a Selection) -> Self {
        Self {
            session,
            approved_nodes: &selection.node_ids,
            approved_edges: &selection.edge_ids,
        }
    }
}

fn default_success() -> bool {
    true
}

/// Fields every reply shares. Decoded separately from the body so that a body
/// type may carry its own `error` field.
#[derive(Debug, Deserialize)]
struct EnvelopeHeader {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Decode a service reply, turning transport and envelope failures into errors.
pub fn decode_reply<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T> {
    let value = serde_json::from_str::<serde_json::Value>(body);
    if !status.is_success() {
        let detail = value.ok().and_then(|value| error_field(&value));
        return Err(match detail {
            Some(message) => anyhow!("service returned {status}: {message}"),
            None => anyhow!("service returned {status}: {}", truncate(body)),
        });
    }
    let value = value.map_err(|err| anyhow!("decode service reply: {err}"))?;
    let header: EnvelopeHeader = serde_json::from_value(value.clone())
        .map_err(|err| anyhow!("decode service reply envelope: {err}"))?;
    if !header.success {
        let message = header
            .error
            .unwrap_or_else(|| "request reported failure without an error".to_string());
        return Err(anyhow!(message));
    }
    serde_json::from_value(value).map_err(|err| anyhow!("decode service reply: {err}"))
}

fn error_field(value: &serde_json::Value) -> Option<String> {
    value.get("error")?.as_str().map(str::to_string)
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= ERROR_BODY_LIMIT {
        return trimmed.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProgressDto {
    pub screens_analyzed: Option<u32>,
    pub total_screens_found: Option<u32>,
    pub nodes_proposed: Option<u32>,
    pub edges_proposed: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisDto {
    pub screen_name: String,
    pub elements_found: Vec<String>,
    pub reasoning: String,
    pub screenshot: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlanDto {
    pub menu_type: String,
    pub strategy: String,
    pub predicted_depth: u32,
    pub reasoning: String,
    pub items: Vec<String>,
    pub lines: Option<Vec<Vec<String>>>,
    pub screenshot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NodeDto {
    #[serde(alias = "node_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub screen_type: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Deserialize)]
pub struct EdgeDto {
    #[serde(alias = "edge_id")]
    pub id: String,
    #[serde(alias = "source_node_id")]
    pub source: String,
    #[serde(alias = "target_node_id")]
    pub target: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Status of a running exploration (start reply and status polls).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusReply {
    pub status: String,
    pub current_step: Option<String>,
    pub progress: Option<ProgressDto>,
    pub current_analysis: Option<AnalysisDto>,
    pub exploration_plan: Option<PlanDto>,
    pub proposed_nodes: Option<Vec<NodeDto>>,
    pub proposed_edges: Option<Vec<EdgeDto>>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartReply {
    pub exploration_id: String,
    #[serde(flatten)]
    pub status: StatusReply,
}

impl StatusReply {
    /// Interim progress carried by this reply.
    pub fn progress_update(&self) -> ProgressUpdate {
        let progress = self.progress.as_ref();
        ProgressUpdate {
            current_step: self.current_step.clone(),
            screens_analyzed: progress.and_then(|p| p.screens_analyzed),
            total_screens_found: progress.and_then(|p| p.total_screens_found),
            nodes_proposed: progress.and_then(|p| p.nodes_proposed),
            edges_proposed: progress.and_then(|p| p.edges_proposed),
            current_analysis: self.current_analysis.as_ref().map(|a| ScreenAnalysis {
                screen_name: a.screen_name.clone(),
                elements_found: a.elements_found.clone(),
                reasoning: a.reasoning.clone(),
                screenshot: a.screenshot.clone(),
            }),
            validation: None,
        }
    }

    /// `Ok(None)` while the exploration is still running; an unknown status is an error.
    pub fn into_outcome(self) -> Result<Option<ExplorationOutcome>> {
        match self.status.as_str() {
            "awaiting_approval" => {
                let plan = self
                    .exploration_plan
                    .ok_or_else(|| anyhow!("exploration awaiting approval without a plan"))?;
                Ok(Some(ExplorationOutcome::Plan(plan.into())))
            }
            "completed" => match (self.exploration_plan, self.proposed_nodes) {
                (Some(plan), None) => Ok(Some(ExplorationOutcome::Plan(plan.into()))),
                (_, nodes) => {
                    let proposals = Proposals {
                        nodes: nodes.unwrap_or_default().into_iter().map(Into::into).collect(),
                        edges: self
                            .proposed_edges
                            .unwrap_or_default()
                            .into_iter()
                            .map(Into::into)
                            .collect(),
                    };
                    Ok(Some(ExplorationOutcome::LegacyResult(proposals)))
                }
            },
            "failed" => Err(anyhow!(
                self.error
                    .unwrap_or_else(|| "exploration failed".to_string())
            )),
            "cancelled" => Err(anyhow!("exploration was cancelled")),
            "starting" | "exploring" => Ok(None),
            other => Err(anyhow!("unexpected exploration status `{other}`")),
        }
    }
}

impl From<PlanDto> for ExplorationPlan {
    fn from(dto: PlanDto) -> Self {
        Self {
            menu_type: dto.menu_type,
            strategy: dto.strategy,
            predicted_depth: dto.predicted_depth,
            reasoning: dto.reasoning,
            items: dto.items,
            lines: dto.lines,
            screenshot: dto.screenshot,
        }
    }
}

impl From<NodeDto> for ProposedNode {
    fn from(dto: NodeDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            screen_type: dto.screen_type,
            reasoning: dto.reasoning,
        }
    }
}

impl From<EdgeDto> for ProposedEdge {
    fn from(dto: EdgeDto) -> Self {
        Self {
            id: dto.id,
            source: dto.source,
            target: dto.target,
            reasoning: dto.reasoning,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContinueReply {
    pub nodes_created: u32,
    pub edges_created: u32,
}

impl From<ContinueReply> for StructureCounts {
    fn from(reply: ContinueReply) -> Self {
        Self {
            nodes_created: reply.nodes_created,
            edges_created: reply.edges_created,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateProgressDto {
    pub current_item: u32,
    pub total_items: u32,
}

#[derive(Debug, Deserialize)]
pub struct ValidateReply {
    pub has_more_items: bool,
    #[serde(default)]
    pub progress: Option<ValidateProgressDto>,
    /// Whether the device was confirmed back on the home screen.
    #[serde(default)]
    pub home_confirmed: Option<bool>,
    #[serde(default)]
    pub edge_id: Option<String>,
}

impl ValidateReply {
    /// Reject "more items" when the device could not be confirmed home:
    /// continuing would validate the next edge from an unknown screen.
    pub fn into_step(self) -> Result<ValidationStep> {
        if self.has_more_items && self.home_confirmed == Some(false) {
            let edge = self.edge_id.as_deref().unwrap_or("unknown edge");
            return Err(anyhow!(
                "device state could not be confirmed after validating {edge}"
            ));
        }
        Ok(ValidationStep {
            has_more_items: self.has_more_items,
            progress: self.progress.map(|p| ValidationProgress {
                current: p.current_item,
                total: p.total_items,
            }),
            edge_id: self.edge_id,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ApproveReply {
    #[serde(default)]
    pub nodes_added: u32,
    #[serde(default)]
    pub edges_added: u32,
}

impl From<ApproveReply> for ApprovalReceipt {
    fn from(reply: ApproveReply) -> Self {
        Self {
            nodes_added: reply.nodes_added,
            edges_added: reply.edges_added,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FinalizeReply {
    #[serde(default)]
    pub nodes_finalized: u32,
    #[serde(default)]
    pub edges_finalized: u32,
}

impl From<FinalizeReply> for FinalizeReceipt {
    fn from(reply: FinalizeReply) -> Self {
        Self {
            nodes_finalized: reply.nodes_finalized,
            edges_finalized: reply.edges_finalized,
        }
    }
}

/// Replies whose body carries nothing beyond the envelope.
#[derive(Debug, Deserialize)]
pub struct EmptyReply {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DeviceRef;

    #[test]
    fn start_body_flattens_session_fields() {
        let target = SessionTarget::new("tree-1", DeviceRef::new("host-a", "device1"));
        let body = StartBody {
            session: SessionBody::new(&target, None),
            exploration_depth: 5,
            mode: ExplorationMode::Incremental,
        };
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "tree_id": "tree-1",
                "host_name": "host-a",
                "device_id": "device1",
                "exploration_depth": 5,
                "mode": "incremental"
            })
        );
    }

    #[test]
    fn start_reply_with_plan_resolves_to_plan() {
        let raw = r#"{
            "success": true,
            "exploration_id": "exp-42",
            "status": "awaiting_approval",
            "current_step": "Analysis complete",
            "progress": {"screens_analyzed": 1, "nodes_proposed": 0},
            "exploration_plan": {
                "menu_type": "horizontal",
                "strategy": "dpad",
                "items": ["live", "guide", "apps", "settings"],
                "lines": [["live", "guide"], ["apps", "settings"]],
                "screenshot": "captures/home.jpg"
            }
        }"#;
        let reply: StartReply = decode_reply(StatusCode::OK, raw).expect("decode");
        assert_eq!(reply.exploration_id, "exp-42");

        let update = reply.status.progress_update();
        assert_eq!(update.current_step.as_deref(), Some("Analysis complete"));
        assert_eq!(update.screens_analyzed, Some(1));

        match reply.status.into_outcome().expect("outcome") {
            Some(ExplorationOutcome::Plan(plan)) => {
                assert_eq!(plan.items.len(), 4);
                assert_eq!(plan.lines.expect("lines").len(), 2);
                assert_eq!(plan.menu_type, "horizontal");
            }
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn completed_status_resolves_to_proposals() {
        let raw = r#"{
            "status": "completed",
            "proposed_nodes": [{"node_id": "live", "name": "Live TV", "screen_type": "screen"}],
            "proposed_edges": [{"edge_id": "home-live", "source_node_id": "home", "target_node_id": "live"}]
        }"#;
        let reply: StatusReply = decode_reply(StatusCode::OK, raw).expect("decode");
        match reply.into_outcome().expect("outcome") {
            Some(ExplorationOutcome::LegacyResult(proposals)) => {
                assert_eq!(proposals.nodes[0].id, "live");
                assert_eq!(proposals.edges[0].source, "home");
                assert_eq!(proposals.edges[0].target, "live");
            }
            other => panic!("expected proposals, got {other:?}"),
        }
    }

    #[test]
    fn running_status_is_pending() {
        let reply: StatusReply =
            decode_reply(StatusCode::OK, r#"{"status": "exploring"}"#).expect("decode");
        assert!(reply.into_outcome().expect("outcome").is_none());
    }

    #[test]
    fn unknown_status_is_an_error() {
        let reply: StatusReply =
            decode_reply(StatusCode::OK, r#"{"status": "error"}"#).expect("decode");
        let err = reply.into_outcome().unwrap_err();
        assert_eq!(err.to_string(), "unexpected exploration status `error`");
    }

    #[test]
    fn failed_status_carries_server_error() {
        let reply: StatusReply = decode_reply(
            StatusCode::OK,
            r#"{"status": "failed", "error": "screenshot capture failed"}"#,
        )
        .expect("decode");
        let err = reply.into_outcome().unwrap_err();
        assert_eq!(err.to_string(), "screenshot capture failed");
    }

    #[test]
    fn unsuccessful_envelope_is_an_error() {
        let err = decode_reply::<ContinueReply>(
            StatusCode::OK,
            r#"{"success": false, "error": "no approved plan"}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "no approved plan");
    }

    #[test]
    fn http_error_prefers_json_error_field() {
        let err = decode_reply::<ContinueReply>(
            StatusCode::CONFLICT,
            r#"{"success": false, "error": "device locked by another session"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("409"));
        assert!(err.to_string().contains("device locked by another session"));

        let err = decode_reply::<ContinueReply>(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>")
            .unwrap_err();
        assert!(err.to_string().contains("<html>bad gateway</html>"));
    }

    #[test]
    fn unconfirmed_home_with_more_items_is_ambiguous() {
        let reply: ValidateReply = decode_reply(
            StatusCode::OK,
            r#"{"has_more_items": true, "home_confirmed": false, "edge_id": "home-live"}"#,
        )
        .expect("decode");
        let err = reply.into_step().unwrap_err();
        assert!(err.to_string().contains("home-live"));
    }

    #[test]
    fn validate_reply_maps_progress() {
        let reply: ValidateReply = decode_reply(
            StatusCode::OK,
            r#"{"has_more_items": false, "progress": {"current_item": 6, "total_items": 6}}"#,
        )
        .expect("decode");
        let step = reply.into_step().expect("step");
        assert!(!step.has_more_items);
        assert_eq!(
            step.progress,
            Some(ValidationProgress {
                current: 6,
                total: 6
            })
        );
    }
}
