//! The session store: identity, phase and everything received so far.
//!
//! One `ExplorationSession` exists per open workflow. It is reset to its
//! initial state (same target, fresh generation) when the workflow closes.

use crate::core::phase::{Event, Phase, next_phase};
use crate::core::progress::ProgressAggregator;
use crate::core::selection::{Selection, SelectionSet};
use crate::core::types::{
    Depth, ExplorationMode, ExplorationPlan, Proposals, SessionTarget, StructureCounts,
};

/// Remote call that can be re-issued verbatim by `retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Start { depth: Depth },
    Continue,
    ValidateNext,
    Approve(Selection),
    Finalize,
}

impl RemoteCall {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCall::Start { .. } => "start",
            RemoteCall::Continue => "continue",
            RemoteCall::ValidateNext => "validate_next",
            RemoteCall::Approve(_) => "approve",
            RemoteCall::Finalize => "finalize",
        }
    }
}

/// The call that moved the session into `Failed`, and where retry resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedCall {
    pub call: RemoteCall,
    pub resume: Phase,
}

/// Validation bookkeeping: `completed` successful steps out of `total` edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRun {
    pub total: u32,
    pub completed: u32,
}

/// A recorded phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: Phase,
    pub to: Phase,
}

#[derive(Debug, Clone)]
pub struct ExplorationSession {
    pub target: SessionTarget,
    pub mode: ExplorationMode,
    /// Set when `start` is accepted.
    pub depth: Option<Depth>,
    pub phase: Phase,
    /// Last error or rejection, cleared on the next successful transition.
    pub error: Option<String>,
    pub exploration_id: Option<String>,
    pub plan: Option<ExplorationPlan>,
    pub proposals: Option<Proposals>,
    pub selection: Option<SelectionSet>,
    pub structure: Option<StructureCounts>,
    pub validation: Option<ValidationRun>,
    pub progress: ProgressAggregator,
    pub failure: Option<FailedCall>,
    /// True while a remote call (other than cancel) is outstanding.
    pub in_flight: bool,
    pub cancel_requested: bool,
    /// Bumped on reset; responses tagged with an older generation are stale.
    pub generation: u64,
}

impl ExplorationSession {
    pub fn new(target: SessionTarget, mode: ExplorationMode) -> Self {
        Self {
            target,
            mode,
            depth: None,
            phase: Phase::Configuring,
            error: None,
            exploration_id: None,
            plan: None,
            proposals: None,
            selection: None,
            structure: None,
            validation: None,
            progress: ProgressAggregator::default(),
            failure: None,
            in_flight: false,
            cancel_requested: false,
            generation: 0,
        }
    }

    /// Move to the phase `event` leads to. Returns `None` (phase unchanged) if
    /// the event is not valid in the current phase.
    pub fn apply(&mut self, event: Event) -> Option<PhaseChange> {
        let from = self.phase;
        let to = next_phase(from, event)?;
        self.phase = to;
        if to != Phase::Failed {
            self.error = None;
        }
        Some(PhaseChange { from, to })
    }

    /// Record a failed remote call and move to `Failed`.
    pub fn fail(
        &mut self,
        call: RemoteCall,
        resume: Phase,
        message: String,
    ) -> Option<PhaseChange> {
        let change = self.apply(Event::CallFailed)?;
        self.error = Some(message);
        self.failure = Some(FailedCall { call, resume });
        Some(change)
    }

    /// Drop everything but the target and mode, and start a new generation.
    pub fn reset(&mut self) {
        let generation = self.generation + 1;
        *self = Self::new(self.target.clone(), self.mode);
        self.generation = generation;
    }

    /// True when `generation` still names this session and no cancel is pending.
    pub fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && !self.cancel_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DeviceRef;

    fn session() -> ExplorationSession {
        ExplorationSession::new(
            SessionTarget::new("tree-1", DeviceRef::new("host-a", "device1")),
            ExplorationMode::Incremental,
        )
    }

    #[test]
    fn successful_transition_clears_error() {
        let mut session = session();
        session.error = Some("device busy".to_string());
        let change = session.apply(Event::StartIssued).expect("legal");
        assert_eq!(
            change,
            PhaseChange {
                from: Phase::Configuring,
                to: Phase::Exploring
            }
        );
        assert_eq!(session.error, None);
    }

    #[test]
    fn illegal_event_leaves_phase_and_error() {
        let mut session = session();
        session.error = Some("kept".to_string());
        assert_eq!(session.apply(Event::Committed), None);
        assert_eq!(session.phase, Phase::Configuring);
        assert_eq!(session.error.as_deref(), Some("kept"));
    }

    #[test]
    fn fail_records_call_and_message() {
        let mut session = session();
        session.apply(Event::StartIssued);
        let depth = Depth::new(5).expect("depth");
        session.fail(
            RemoteCall::Start { depth },
            Phase::Configuring,
            "connection refused".to_string(),
        );
        assert_eq!(session.phase, Phase::Failed);
        assert_eq!(session.error.as_deref(), Some("connection refused"));
        assert_eq!(
            session.failure,
            Some(FailedCall {
                call: RemoteCall::Start { depth },
                resume: Phase::Configuring
            })
        );
    }

    #[test]
    fn reset_keeps_target_and_bumps_generation() {
        let mut session = session();
        session.apply(Event::StartIssued);
        session.exploration_id = Some("exp-1".to_string());
        session.cancel_requested = true;

        session.reset();
        assert_eq!(session.phase, Phase::Configuring);
        assert_eq!(session.exploration_id, None);
        assert_eq!(session.target.tree_id, "tree-1");
        assert_eq!(session.generation, 1);
        assert!(session.accepts(1));
        assert!(!session.accepts(0));
    }
}
