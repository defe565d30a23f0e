//! Workflow phases and the transition table.
//!
//! A single tagged `Phase` replaces the cluster of booleans a UI would otherwise
//! derive (`is_exploring`, `has_results`, ...). Two tables live here:
//!
//! - [`permits`]: which user [`Action`]s are legal in which phase.
//! - [`next_phase`]: which [`Event`] moves which phase where.
//!
//! Both are pure and total; anything not listed is a no-op.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current state of an exploration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Configuring,
    Exploring,
    /// Incremental flow: plan received, waiting for the user.
    AwaitingApproval,
    /// Single-shot flow: proposals received, waiting for a selection.
    ResultsReady,
    StructureCreated,
    AwaitingValidation,
    /// A `validateNext` call is in flight.
    Validating,
    ValidationComplete,
    Committed,
    /// Cancel accepted, remote abort (or the in-flight validation) still settling.
    Cancelling,
    Cancelled,
    Failed,
}

impl Phase {
    pub const ALL: [Phase; 12] = [
        Phase::Configuring,
        Phase::Exploring,
        Phase::AwaitingApproval,
        Phase::ResultsReady,
        Phase::StructureCreated,
        Phase::AwaitingValidation,
        Phase::Validating,
        Phase::ValidationComplete,
        Phase::Committed,
        Phase::Cancelling,
        Phase::Cancelled,
        Phase::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Committed | Phase::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Configuring => "configuring",
            Phase::Exploring => "exploring",
            Phase::AwaitingApproval => "awaiting_approval",
            Phase::ResultsReady => "results_ready",
            Phase::StructureCreated => "structure_created",
            Phase::AwaitingValidation => "awaiting_validation",
            Phase::Validating => "validating",
            Phase::ValidationComplete => "validation_complete",
            Phase::Committed => "committed",
            Phase::Cancelling => "cancelling",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-initiated commands exposed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Continue,
    StartValidation,
    Cancel,
    Approve,
    /// `select_all` / `toggle_node` / `toggle_edge` on the single-shot selection.
    EditSelection,
    Finalize,
    Retry,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Start,
        Action::Continue,
        Action::StartValidation,
        Action::Cancel,
        Action::Approve,
        Action::EditSelection,
        Action::Finalize,
        Action::Retry,
    ];
}

/// Returns true if `action` may be issued while in `phase`.
pub fn permits(phase: Phase, action: Action) -> bool {
    match action {
        Action::Start => matches!(phase, Phase::Configuring | Phase::AwaitingApproval),
        Action::Continue => phase == Phase::AwaitingApproval,
        Action::StartValidation => phase == Phase::StructureCreated,
        Action::Approve | Action::EditSelection => phase == Phase::ResultsReady,
        Action::Finalize => phase == Phase::ValidationComplete,
        Action::Retry => phase == Phase::Failed,
        Action::Cancel => !phase.is_terminal() && phase != Phase::Cancelling,
    }
}

/// Things that move the machine: accepted commands and remote outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    StartIssued,
    PlanReceived,
    ResultsReceived,
    StructureCreated,
    ValidationStarted,
    ValidationIssued,
    MoreItems,
    NoMoreItems,
    Committed,
    CallFailed,
    /// Leave `Failed` by re-entering the phase that issued the failing call.
    Retried(Phase),
    CancelRequested,
    CancelSettled,
}

/// Phases a failed call may resume from.
fn is_resumable(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::Configuring
            | Phase::AwaitingApproval
            | Phase::ResultsReady
            | Phase::AwaitingValidation
            | Phase::ValidationComplete
    )
}

/// Apply `event` to `from`. Returns `None` when the event is not valid there.
pub fn next_phase(from: Phase, event: Event) -> Option<Phase> {
    use Phase as P;

    let to = match (from, event) {
        (P::Configuring | P::AwaitingApproval, Event::StartIssued) => P::Exploring,
        (P::Exploring, Event::PlanReceived) => P::AwaitingApproval,
        (P::Exploring, Event::ResultsReceived) => P::ResultsReady,
        (P::AwaitingApproval, Event::StructureCreated) => P::StructureCreated,
        (P::StructureCreated, Event::ValidationStarted) => P::AwaitingValidation,
        (P::AwaitingValidation, Event::ValidationIssued) => P::Validating,
        (P::Validating, Event::MoreItems) => P::AwaitingValidation,
        // AwaitingValidation only sees this when there was nothing to validate.
        (P::Validating | P::AwaitingValidation, Event::NoMoreItems) => P::ValidationComplete,
        (P::ResultsReady | P::ValidationComplete, Event::Committed) => P::Committed,
        (
            P::Exploring
            | P::AwaitingApproval
            | P::ResultsReady
            | P::Validating
            | P::ValidationComplete
            | P::AwaitingValidation,
            Event::CallFailed,
        ) => P::Failed,
        (P::Failed, Event::Retried(resume)) if is_resumable(resume) => resume,
        (phase, Event::CancelRequested) if permits(phase, Action::Cancel) => P::Cancelling,
        (P::Cancelling, Event::CancelSettled) => P::Cancelled,
        _ => return None,
    };
    Some(to)
}
