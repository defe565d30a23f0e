//! Test-only doubles for the exploration service and device control.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::core::progress::ProgressUpdate;
use crate::core::selection::Selection;
use crate::core::types::{
    ApprovalReceipt, DeviceRef, ExplorationMode, ExplorationOutcome, ExplorationPlan,
    FinalizeReceipt, Proposals, ProposedEdge, ProposedNode, SessionTarget, StructureCounts,
    ValidationProgress, ValidationStep,
};
use crate::io::client::{
    EventSink, ExplorationClient, ExplorationEvent, StartRequest, StartedExploration, emit,
};
use crate::io::device::DeviceControl;
use crate::workflow::WorkflowSettings;

/// Exploration id handed out by [`ScriptedClient::start`].
pub const EXPLORATION_ID: &str = "exp-1";

/// A remote call as observed by [`ScriptedClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start { depth: u8 },
    Continue,
    ValidateNext,
    Approve { nodes: Vec<String>, edges: Vec<String> },
    Finalize,
    Cancel,
}

/// Scripted reply; `Err` carries the error message to fail with.
pub type Scripted<T> = Result<T, String>;

#[derive(Debug, Default)]
struct Script {
    starts: VecDeque<Scripted<ExplorationOutcome>>,
    continues: VecDeque<Scripted<StructureCounts>>,
    validations: VecDeque<Scripted<ValidationStep>>,
    approvals: VecDeque<Scripted<ApprovalReceipt>>,
    finalizations: VecDeque<Scripted<FinalizeReceipt>>,
    calls: Vec<Call>,
}

/// Deterministic [`ExplorationClient`] replaying queued replies.
///
/// An empty queue fails the call. Optional gates hold `start` or
/// `validate_next` until the test releases them, to exercise cancel races.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    script: Mutex<Script>,
    start_gate: Option<Arc<Notify>>,
    validation_gate: Option<Arc<Notify>>,
}

impl ScriptedClient {
    /// Hold every `start` until `gate` is notified (after events are emitted).
    pub fn with_start_gate(mut self, gate: Arc<Notify>) -> Self {
        self.start_gate = Some(gate);
        self
    }

    /// Hold every `validate_next` until `gate` is notified.
    pub fn with_validation_gate(mut self, gate: Arc<Notify>) -> Self {
        self.validation_gate = Some(gate);
        self
    }

    pub fn push_start(&self, reply: Scripted<ExplorationOutcome>) {
        self.script().starts.push_back(reply);
    }

    pub fn push_continue(&self, reply: Scripted<StructureCounts>) {
        self.script().continues.push_back(reply);
    }

    pub fn push_validation(&self, reply: Scripted<ValidationStep>) {
        self.script().validations.push_back(reply);
    }

    pub fn push_approval(&self, reply: Scripted<ApprovalReceipt>) {
        self.script().approvals.push_back(reply);
    }

    pub fn push_finalize(&self, reply: Scripted<FinalizeReceipt>) {
        self.script().finalizations.push_back(reply);
    }

    /// Every call issued so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script lock")
    }

    fn record<T>(
        &self,
        call: Call,
        queue: impl FnOnce(&mut Script) -> Option<Scripted<T>>,
    ) -> Option<Scripted<T>> {
        let mut script = self.script();
        script.calls.push(call);
        queue(&mut *script)
    }
}

fn replay<T>(name: &str, reply: Option<Scripted<T>>) -> Result<T> {
    match reply {
        Some(Ok(value)) => Ok(value),
        Some(Err(message)) => Err(anyhow!(message)),
        None => Err(anyhow!("no scripted reply for {name}")),
    }
}

#[async_trait]
impl ExplorationClient for ScriptedClient {
    async fn start(
        &self,
        request: &StartRequest,
        events: EventSink<'_>,
    ) -> Result<StartedExploration> {
        let reply = self.record(
            Call::Start {
                depth: request.depth.get(),
            },
            |script| script.starts.pop_front(),
        );
        emit(
            events,
            ExplorationEvent::Started {
                exploration_id: EXPLORATION_ID.to_string(),
            },
        )?;
        emit(
            events,
            ExplorationEvent::Progress(ProgressUpdate::step("analyzing current screen")),
        )?;
        if let Some(gate) = &self.start_gate {
            emit(events, ExplorationEvent::Waiting)?;
            gate.notified().await;
        }
        let outcome = replay("start", reply)?;
        Ok(StartedExploration {
            exploration_id: EXPLORATION_ID.to_string(),
            outcome,
        })
    }

    async fn continue_exploration(
        &self,
        _target: &SessionTarget,
        _exploration_id: &str,
    ) -> Result<StructureCounts> {
        let reply = self.record(Call::Continue, |script| script.continues.pop_front());
        replay("continue", reply)
    }

    async fn validate_next(
        &self,
        _target: &SessionTarget,
        _exploration_id: &str,
    ) -> Result<ValidationStep> {
        let reply = self.record(Call::ValidateNext, |script| script.validations.pop_front());
        if let Some(gate) = &self.validation_gate {
            gate.notified().await;
        }
        replay("validate_next", reply)
    }

    async fn approve(
        &self,
        _target: &SessionTarget,
        _exploration_id: &str,
        selection: &Selection,
    ) -> Result<ApprovalReceipt> {
        let call = Call::Approve {
            nodes: selection.node_ids.clone(),
            edges: selection.edge_ids.clone(),
        };
        let reply = self.record(call, |script| script.approvals.pop_front());
        replay("approve", reply)
    }

    async fn finalize(
        &self,
        _target: &SessionTarget,
        _exploration_id: &str,
    ) -> Result<FinalizeReceipt> {
        let reply = self.record(Call::Finalize, |script| script.finalizations.pop_front());
        replay("finalize", reply)
    }

    async fn cancel(&self, _target: &SessionTarget, _exploration_id: Option<&str>) -> Result<()> {
        self.script().calls.push(Call::Cancel);
        Ok(())
    }
}

/// Device control whose answer the test can flip.
#[derive(Debug)]
pub struct FakeDevice {
    controlled: AtomicBool,
}

impl FakeDevice {
    pub fn controlled() -> Self {
        Self {
            controlled: AtomicBool::new(true),
        }
    }

    pub fn released() -> Self {
        Self {
            controlled: AtomicBool::new(false),
        }
    }

    pub fn set_controlled(&self, controlled: bool) {
        self.controlled.store(controlled, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceControl for FakeDevice {
    async fn is_under_control(&self, _device: &DeviceRef) -> bool {
        self.controlled.load(Ordering::SeqCst)
    }
}

pub fn target() -> SessionTarget {
    SessionTarget::new("tree-1", DeviceRef::new("host-a", "device1"))
}

/// Incremental mode with no delay between validation steps.
pub fn settings() -> WorkflowSettings {
    WorkflowSettings {
        mode: ExplorationMode::Incremental,
        validation_step_delay: Duration::ZERO,
        cancel_timeout: Duration::from_secs(1),
    }
}

/// A deterministic plan listing `items` menu entries.
pub fn plan_with_items(items: usize) -> ExplorationPlan {
    ExplorationPlan {
        menu_type: "horizontal".to_string(),
        strategy: "click each item and return home".to_string(),
        predicted_depth: 2,
        reasoning: "top-level menu detected".to_string(),
        items: (1..=items).map(|i| format!("item_{i}")).collect(),
        lines: None,
        screenshot: None,
    }
}

/// Single-shot proposals; edges are `(id, source, target)`.
pub fn proposals(nodes: &[&str], edges: &[(&str, &str, &str)]) -> Proposals {
    Proposals {
        nodes: nodes
            .iter()
            .map(|id| ProposedNode {
                id: id.to_string(),
                name: id.to_string(),
                screen_type: "screen".to_string(),
                reasoning: String::new(),
            })
            .collect(),
        edges: edges
            .iter()
            .map(|(id, source, target)| ProposedEdge {
                id: id.to_string(),
                source: source.to_string(),
                target: target.to_string(),
                reasoning: String::new(),
            })
            .collect(),
    }
}

/// `n` validation replies: "more items" `n - 1` times, then done.
pub fn validation_steps(n: u32) -> Vec<ValidationStep> {
    (1..=n)
        .map(|current| ValidationStep {
            has_more_items: current < n,
            progress: Some(ValidationProgress { current, total: n }),
            edge_id: Some(format!("edge_{current}")),
        })
        .collect()
}
