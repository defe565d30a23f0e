//! The exploration workflow: commands, remote calls and phase bookkeeping.
//!
//! A [`Workflow`] owns one [`ExplorationSession`] and drives it through the
//! phases in [`crate::core::phase`]. Commands that are not legal in the current
//! phase are ignored rather than treated as errors, so a stale presentation
//! layer cannot desynchronize the machine.
//!
//! The session lock is only ever held between remote calls, never across an
//! `.await`. Every remote call is tagged with the session generation; a
//! response whose generation no longer matches, or that arrives after a cancel
//! was requested, is discarded.

use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Error, anyhow};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::phase::{Action, Event, Phase, permits};
use crate::core::progress::{Progress, ProgressUpdate};
use crate::core::selection::{Selection, SelectionSet};
use crate::core::session::{ExplorationSession, PhaseChange, RemoteCall, ValidationRun};
use crate::core::types::{
    Depth, ExplorationMode, ExplorationOutcome, ExplorationPlan, Proposals, Rejection,
    SessionTarget, StructureCounts,
};
use crate::io::client::{ExplorationClient, ExplorationEvent, StartRequest};
use crate::io::config::ExplorerConfig;
use crate::io::device::DeviceControl;
use crate::looping::run_validation_loop;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Timing and mode knobs for one workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    pub mode: ExplorationMode,
    /// Pause between auto-continued `validate_next` calls.
    pub validation_step_delay: Duration,
    /// Upper bound on waiting for the remote abort.
    pub cancel_timeout: Duration,
}

impl WorkflowSettings {
    pub fn from_config(cfg: &ExplorerConfig, mode: ExplorationMode) -> Self {
        Self {
            mode,
            validation_step_delay: cfg.validation_step_delay(),
            cancel_timeout: cfg.cancel_timeout(),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from_config(&ExplorerConfig::default(), ExplorationMode::default())
    }
}

/// What a command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command ran and its result was applied to the session.
    Applied,
    /// Not legal in `phase` (or another call is in flight); nothing changed.
    Ignored { phase: Phase },
    /// A local precondition failed; no remote call was made.
    Rejected(Rejection),
    /// The remote call failed and the session moved to `Failed`.
    Failed { message: String },
    /// The response arrived after a cancel or reset and was dropped.
    Discarded,
}

/// Read-only snapshot of the session for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowView {
    pub target: SessionTarget,
    pub mode: ExplorationMode,
    pub phase: Phase,
    pub error: Option<String>,
    pub depth: Option<Depth>,
    pub exploration_id: Option<String>,
    pub plan: Option<ExplorationPlan>,
    pub proposals: Option<Proposals>,
    pub selection: Option<SelectionSet>,
    pub structure: Option<StructureCounts>,
    pub progress: Progress,
    pub in_flight: bool,
}

/// Issued-call bookkeeping: which session the call belongs to and where
/// `retry` resumes if it fails.
#[derive(Debug, Clone)]
pub(crate) struct Ticket {
    pub(crate) generation: u64,
    pub(crate) resume: Phase,
    pub(crate) exploration_id: Option<String>,
}

/// How an issued call's response relates to the current session.
pub(crate) enum Settled<'a> {
    Accepted(MutexGuard<'a, ExplorationSession>),
    /// Same session, but a cancel was requested while the call was in flight.
    CancelPending,
    /// The session was reset since the call was issued.
    Superseded,
}

pub struct Workflow<C, D> {
    client: C,
    device: D,
    target: SessionTarget,
    settings: WorkflowSettings,
    session: Mutex<ExplorationSession>,
    changes: broadcast::Sender<PhaseChange>,
}

impl<C: ExplorationClient, D: DeviceControl> Workflow<C, D> {
    pub fn new(client: C, device: D, target: SessionTarget, settings: WorkflowSettings) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            session: Mutex::new(ExplorationSession::new(target.clone(), settings.mode)),
            client,
            device,
            target,
            settings,
            changes,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn snapshot(&self) -> WorkflowView {
        let session = self.lock();
        WorkflowView {
            target: session.target.clone(),
            mode: session.mode,
            phase: session.phase,
            error: session.error.clone(),
            depth: session.depth,
            exploration_id: session.exploration_id.clone(),
            plan: session.plan.clone(),
            proposals: session.proposals.clone(),
            selection: session.selection.clone(),
            structure: session.structure,
            progress: session.progress.view().clone(),
            in_flight: session.in_flight,
        }
    }

    /// Phase changes from now on, in the order they happen.
    pub fn subscribe(&self) -> broadcast::Receiver<PhaseChange> {
        self.changes.subscribe()
    }

    /// Explore the device's current screen up to `depth` levels.
    ///
    /// Legal from `Configuring`, and from `AwaitingApproval` to ask for a new
    /// plan. Requires the device to be under control.
    pub async fn start(&self, depth: u8) -> CommandOutcome {
        if let Some(ignored) = self.check_idle(Action::Start) {
            return ignored;
        }
        let depth = match Depth::new(depth) {
            Ok(depth) => depth,
            Err(rejection) => return self.reject(rejection),
        };
        if !self.device.is_under_control(&self.target.device).await {
            return self.reject(Rejection::DeviceNotControlled(self.target.device.clone()));
        }
        self.issue_start(depth).await
    }

    /// Materialise the approved plan as temporary structure.
    pub async fn continue_exploration(&self) -> CommandOutcome {
        let ticket = match self.begin(Action::Continue, None, |_| Ok(())) {
            Ok((ticket, ())) => ticket,
            Err(outcome) => return outcome,
        };
        let result = match ticket.exploration_id.as_deref() {
            Some(id) => self.client.continue_exploration(&self.target, id).await,
            None => Err(missing_exploration_id()),
        };

        let mut session = match self.settle(&ticket) {
            Settled::Accepted(session) => session,
            _ => return CommandOutcome::Discarded,
        };
        match result {
            Ok(counts) => {
                info!(
                    nodes_created = counts.nodes_created,
                    edges_created = counts.edges_created,
                    "structure created"
                );
                session.structure = Some(counts);
                self.apply(&mut session, Event::StructureCreated);
                CommandOutcome::Applied
            }
            Err(err) => self.fail(&mut session, RemoteCall::Continue, ticket.resume, &err),
        }
    }

    /// Begin validating the created edges and auto-continue until none remain.
    pub async fn start_validation(&self) -> CommandOutcome {
        {
            let mut session = self.lock();
            let phase = session.phase;
            if !permits(phase, Action::StartValidation) || session.in_flight {
                return CommandOutcome::Ignored { phase };
            }
            let total = session.structure.map(|s| s.edges_created).unwrap_or(0);
            session.validation = Some(ValidationRun {
                total,
                completed: 0,
            });
            session.progress.begin_validation(total);
            self.apply(&mut session, Event::ValidationStarted);
            if total == 0 {
                info!("no edges to validate");
                self.apply(&mut session, Event::NoMoreItems);
                return CommandOutcome::Applied;
            }
            info!(total, "validation started");
        }
        run_validation_loop(self).await.into()
    }

    /// Commit the currently selected single-shot proposals.
    pub async fn approve(&self) -> CommandOutcome {
        self.issue_approve(None).await
    }

    /// Send `approve` with `resend`, or with the current selection when `None`.
    async fn issue_approve(&self, resend: Option<Selection>) -> CommandOutcome {
        let (ticket, selection) = match self.begin(Action::Approve, None, |session| {
            let selection = resend.unwrap_or_else(|| {
                session
                    .selection
                    .as_ref()
                    .map(SelectionSet::compute)
                    .unwrap_or_default()
            });
            if selection.is_empty() {
                return Err(Rejection::EmptySelection);
            }
            Ok(selection)
        }) {
            Ok(issued) => issued,
            Err(outcome) => return outcome,
        };
        let result = match ticket.exploration_id.as_deref() {
            Some(id) => self.client.approve(&self.target, id, &selection).await,
            None => Err(missing_exploration_id()),
        };

        let mut session = match self.settle(&ticket) {
            Settled::Accepted(session) => session,
            _ => return CommandOutcome::Discarded,
        };
        match result {
            Ok(receipt) => {
                info!(
                    nodes_added = receipt.nodes_added,
                    edges_added = receipt.edges_added,
                    "proposals approved"
                );
                self.apply(&mut session, Event::Committed);
                CommandOutcome::Applied
            }
            Err(err) => self.fail(
                &mut session,
                RemoteCall::Approve(selection),
                ticket.resume,
                &err,
            ),
        }
    }

    /// Make validated structure permanent.
    pub async fn finalize(&self) -> CommandOutcome {
        let ticket = match self.begin(Action::Finalize, None, |_| Ok(())) {
            Ok((ticket, ())) => ticket,
            Err(outcome) => return outcome,
        };
        let result = match ticket.exploration_id.as_deref() {
            Some(id) => self.client.finalize(&self.target, id).await,
            None => Err(missing_exploration_id()),
        };

        let mut session = match self.settle(&ticket) {
            Settled::Accepted(session) => session,
            _ => return CommandOutcome::Discarded,
        };
        match result {
            Ok(receipt) => {
                info!(
                    nodes_finalized = receipt.nodes_finalized,
                    edges_finalized = receipt.edges_finalized,
                    "structure finalized"
                );
                self.apply(&mut session, Event::Committed);
                CommandOutcome::Applied
            }
            Err(err) => self.fail(&mut session, RemoteCall::Finalize, ticket.resume, &err),
        }
    }

    pub fn select_all(&self) -> CommandOutcome {
        self.edit_selection(|set| {
            set.select_all();
            Ok(())
        })
    }

    pub fn toggle_node(&self, id: &str) -> CommandOutcome {
        self.edit_selection(|set| {
            if set.toggle_node(id) {
                Ok(())
            } else {
                Err(Rejection::UnknownProposal(id.to_string()))
            }
        })
    }

    pub fn toggle_edge(&self, id: &str) -> CommandOutcome {
        self.edit_selection(|set| {
            if set.toggle_edge(id) {
                Ok(())
            } else {
                Err(Rejection::UnknownProposal(id.to_string()))
            }
        })
    }

    /// The selection `approve` would send right now.
    pub fn compute_selection(&self) -> Option<Selection> {
        self.lock().selection.as_ref().map(SelectionSet::compute)
    }

    /// Cancel the session.
    ///
    /// The phase moves to `Cancelling` at once. A validation step already in
    /// flight is left to finish and the validation loop settles the cancel;
    /// otherwise the remote abort is sent here (bounded by the cancel timeout,
    /// failures only logged) and the phase moves to `Cancelled`.
    pub async fn cancel(&self) -> CommandOutcome {
        let (generation, exploration_id) = {
            let mut session = self.lock();
            let from = session.phase;
            if !permits(from, Action::Cancel) {
                return CommandOutcome::Ignored { phase: from };
            }
            session.cancel_requested = true;
            self.apply(&mut session, Event::CancelRequested);
            info!(from = %from, "cancel requested");
            match from {
                Phase::Configuring => {
                    self.apply(&mut session, Event::CancelSettled);
                    return CommandOutcome::Applied;
                }
                Phase::Validating => return CommandOutcome::Applied,
                _ => {}
            }
            (session.generation, session.exploration_id.clone())
        };
        self.abort_remote(exploration_id.as_deref()).await;
        self.settle_cancel(generation);
        CommandOutcome::Applied
    }

    /// Re-issue the exact call that moved the session into `Failed`.
    pub async fn retry(&self) -> CommandOutcome {
        let failure = {
            let session = self.lock();
            if !permits(session.phase, Action::Retry) || session.in_flight {
                return CommandOutcome::Ignored {
                    phase: session.phase,
                };
            }
            match session.failure.clone() {
                Some(failure) => failure,
                None => {
                    return CommandOutcome::Ignored {
                        phase: session.phase,
                    };
                }
            }
        };
        if matches!(failure.call, RemoteCall::Start { .. })
            && !self.device.is_under_control(&self.target.device).await
        {
            return self.reject(Rejection::DeviceNotControlled(self.target.device.clone()));
        }
        {
            let mut session = self.lock();
            if session.phase != Phase::Failed || session.failure.as_ref() != Some(&failure) {
                return CommandOutcome::Ignored {
                    phase: session.phase,
                };
            }
            session.failure = None;
            self.apply(&mut session, Event::Retried(failure.resume));
        }
        info!(call = failure.call.name(), "retrying failed call");
        match failure.call {
            RemoteCall::Start { depth } => self.issue_start(depth).await,
            RemoteCall::Continue => self.continue_exploration().await,
            RemoteCall::ValidateNext => run_validation_loop(self).await.into(),
            RemoteCall::Approve(selection) => self.issue_approve(Some(selection)).await,
            RemoteCall::Finalize => self.finalize().await,
        }
    }

    /// Close the workflow: cancel anything still running and reset the
    /// session for a fresh exploration of the same target.
    pub async fn close(&self) {
        self.cancel().await;
        let pending = {
            let session = self.lock();
            (session.phase == Phase::Cancelling).then(|| session.exploration_id.clone())
        };
        if let Some(exploration_id) = pending {
            self.abort_remote(exploration_id.as_deref()).await;
        }
        let mut session = self.lock();
        let from = session.phase;
        session.reset();
        debug!(generation = session.generation, "session reset");
        if from != session.phase {
            self.publish(PhaseChange {
                from,
                to: session.phase,
            });
        }
    }

    async fn issue_start(&self, depth: Depth) -> CommandOutcome {
        let ticket = match self.begin(Action::Start, Some(Event::StartIssued), |session| {
            session.depth = Some(depth);
            session.exploration_id = None;
            session.plan = None;
            session.proposals = None;
            session.selection = None;
            session.progress = Default::default();
            Ok(())
        }) {
            Ok((ticket, ())) => ticket,
            Err(outcome) => return outcome,
        };
        let request = StartRequest {
            target: self.target.clone(),
            depth,
            mode: self.settings.mode,
        };
        let generation = ticket.generation;
        let sink = |event: ExplorationEvent| self.on_exploration_event(generation, event);
        let result = self.client.start(&request, &sink).await;

        let mut session = match self.settle(&ticket) {
            Settled::Accepted(session) => session,
            _ => return CommandOutcome::Discarded,
        };
        match result {
            Ok(started) => {
                session.exploration_id = Some(started.exploration_id);
                match started.outcome {
                    ExplorationOutcome::Plan(plan) => {
                        info!(items = plan.items.len(), menu_type = %plan.menu_type, "plan received");
                        self.record_progress(
                            &mut session,
                            ProgressUpdate::proposed(plan.items.len(), None),
                        );
                        session.plan = Some(plan);
                        self.apply(&mut session, Event::PlanReceived);
                    }
                    ExplorationOutcome::LegacyResult(proposals) => {
                        info!(
                            nodes = proposals.nodes.len(),
                            edges = proposals.edges.len(),
                            "proposals received"
                        );
                        self.record_progress(
                            &mut session,
                            ProgressUpdate::proposed(
                                proposals.nodes.len(),
                                Some(proposals.edges.len()),
                            ),
                        );
                        session.selection = Some(SelectionSet::all_included(&proposals));
                        session.proposals = Some(proposals);
                        self.apply(&mut session, Event::ResultsReceived);
                    }
                }
                CommandOutcome::Applied
            }
            Err(err) => self.fail(&mut session, RemoteCall::Start { depth }, ticket.resume, &err),
        }
    }

    /// Fold an interim `start` event into the session. Once the session was
    /// cancelled or reset, the exchange is told to stop polling.
    fn on_exploration_event(&self, generation: u64, event: ExplorationEvent) -> ControlFlow<()> {
        let mut session = self.lock();
        if !session.accepts(generation) {
            debug!(generation, "abandoning exploration of a cancelled or reset session");
            return ControlFlow::Break(());
        }
        match event {
            ExplorationEvent::Started { exploration_id } => {
                session.exploration_id = Some(exploration_id);
            }
            ExplorationEvent::Progress(update) => self.record_progress(&mut session, update),
            ExplorationEvent::Waiting => {}
        }
        ControlFlow::Continue(())
    }

    fn edit_selection(
        &self,
        edit: impl FnOnce(&mut SelectionSet) -> Result<(), Rejection>,
    ) -> CommandOutcome {
        let mut session = self.lock();
        let phase = session.phase;
        if !permits(phase, Action::EditSelection) || session.in_flight {
            return CommandOutcome::Ignored { phase };
        }
        let Some(set) = session.selection.as_mut() else {
            return CommandOutcome::Ignored { phase };
        };
        match edit(set) {
            Ok(()) => {
                session.error = None;
                CommandOutcome::Applied
            }
            Err(rejection) => reject_locked(&mut session, rejection),
        }
    }

    /// Issue-side half of a remote call: check legality, run `prepare`, mark
    /// the call in flight and apply `event`.
    pub(crate) fn begin<T>(
        &self,
        action: Action,
        event: Option<Event>,
        prepare: impl FnOnce(&mut ExplorationSession) -> Result<T, Rejection>,
    ) -> Result<(Ticket, T), CommandOutcome> {
        let mut session = self.lock();
        let phase = session.phase;
        if !permits(phase, action) || session.in_flight {
            return Err(CommandOutcome::Ignored { phase });
        }
        let prepared = prepare(&mut *session)
            .map_err(|rejection| reject_locked(&mut session, rejection))?;
        session.in_flight = true;
        if let Some(event) = event {
            self.apply(&mut session, event);
        }
        let ticket = Ticket {
            generation: session.generation,
            resume: phase,
            exploration_id: session.exploration_id.clone(),
        };
        Ok((ticket, prepared))
    }

    /// Response-side half of a remote call.
    pub(crate) fn settle(&self, ticket: &Ticket) -> Settled<'_> {
        let mut session = self.lock();
        if session.generation != ticket.generation {
            debug!(generation = ticket.generation, "discarding response from a reset session");
            return Settled::Superseded;
        }
        session.in_flight = false;
        if session.cancel_requested {
            debug!(phase = %session.phase, "discarding response after cancel");
            return Settled::CancelPending;
        }
        Settled::Accepted(session)
    }

    /// Finish a cancel that was deferred behind an in-flight validation step.
    pub(crate) async fn settle_deferred_cancel(&self, generation: u64) {
        let exploration_id = {
            let session = self.lock();
            if session.generation != generation || session.phase != Phase::Cancelling {
                return;
            }
            session.exploration_id.clone()
        };
        self.abort_remote(exploration_id.as_deref()).await;
        self.settle_cancel(generation);
    }

    fn settle_cancel(&self, generation: u64) {
        let mut session = self.lock();
        if session.generation == generation && session.phase == Phase::Cancelling {
            self.apply(&mut session, Event::CancelSettled);
        }
    }

    async fn abort_remote(&self, exploration_id: Option<&str>) {
        let abort = self.client.cancel(&self.target, exploration_id);
        match tokio::time::timeout(self.settings.cancel_timeout, abort).await {
            Ok(Ok(())) => info!(exploration_id, "remote exploration aborted"),
            Ok(Err(err)) => warn!(error = %format!("{err:#}"), "remote abort failed; cancelled locally"),
            Err(_) => warn!(
                timeout_ms = self.settings.cancel_timeout.as_millis() as u64,
                "remote abort timed out; cancelled locally"
            ),
        }
    }

    fn check_idle(&self, action: Action) -> Option<CommandOutcome> {
        let session = self.lock();
        (!permits(session.phase, action) || session.in_flight).then_some(CommandOutcome::Ignored {
            phase: session.phase,
        })
    }

    fn reject(&self, rejection: Rejection) -> CommandOutcome {
        reject_locked(&mut self.lock(), rejection)
    }

    pub(crate) fn fail(
        &self,
        session: &mut ExplorationSession,
        call: RemoteCall,
        resume: Phase,
        err: &Error,
    ) -> CommandOutcome {
        let message = format!("{err:#}");
        warn!(call = call.name(), error = %message, "remote call failed");
        if let Some(change) = session.fail(call, resume, message.clone()) {
            self.publish(change);
        }
        CommandOutcome::Failed { message }
    }

    pub(crate) fn apply(&self, session: &mut ExplorationSession, event: Event) {
        if let Some(change) = session.apply(event) {
            self.publish(change);
        }
    }

    pub(crate) fn record_progress(&self, session: &mut ExplorationSession, update: ProgressUpdate) {
        for anomaly in session.progress.apply(update) {
            warn!(?anomaly, "irregular progress update discarded");
        }
    }

    fn publish(&self, change: PhaseChange) {
        debug!(from = %change.from, to = %change.to, "phase change");
        // No receivers is fine.
        let _ = self.changes.send(change);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ExplorationSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reject_locked(session: &mut ExplorationSession, rejection: Rejection) -> CommandOutcome {
    warn!(phase = %session.phase, %rejection, "command rejected");
    session.error = Some(rejection.to_string());
    CommandOutcome::Rejected(rejection)
}

fn missing_exploration_id() -> Error {
    anyhow!("no exploration id recorded for this session")
}
