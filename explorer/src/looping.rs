//! Auto-continued validation loop.
//!
//! After `start_validation`, edges are validated one `validate_next` call at a
//! time. Each successful step that reports more items schedules the next one
//! after a fixed delay. The loop checks for a pending cancel before every call
//! and is bounded by the number of created edges.

use anyhow::Result;
use tracing::{debug, info};

use crate::core::phase::{Event, Phase};
use crate::core::progress::ProgressUpdate;
use crate::core::session::{RemoteCall, ValidationRun};
use crate::core::types::ValidationStep;
use crate::io::client::ExplorationClient;
use crate::io::device::DeviceControl;
use crate::workflow::{CommandOutcome, Settled, Ticket, Workflow};

/// Reason why `run_validation_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The service reported no items left; the session is `ValidationComplete`.
    Complete,
    /// A step failed; the session is `Failed` and `retry` resumes the loop.
    Failed { message: String },
    /// A cancel was requested before or during a step.
    Cancelled,
    /// The session was reset underneath the loop.
    Superseded,
}

impl From<LoopStop> for CommandOutcome {
    fn from(stop: LoopStop) -> Self {
        match stop {
            LoopStop::Complete => CommandOutcome::Applied,
            LoopStop::Failed { message } => CommandOutcome::Failed { message },
            LoopStop::Cancelled | LoopStop::Superseded => CommandOutcome::Discarded,
        }
    }
}

enum StepResult {
    Next,
    Stop(LoopStop),
    /// The step's response was dropped because of a cancel; finish the cancel.
    SettleCancel,
}

/// Validate edges until none remain, a step fails, or the session is cancelled.
///
/// Expects the session in `AwaitingValidation`.
pub(crate) async fn run_validation_loop<C, D>(workflow: &Workflow<C, D>) -> LoopStop
where
    C: ExplorationClient,
    D: DeviceControl,
{
    let generation = workflow.lock().generation;
    let delay = workflow.settings().validation_step_delay;
    loop {
        let ticket = match begin_step(workflow, generation) {
            Ok(ticket) => ticket,
            Err(stop) => return stop,
        };
        let result = match ticket.exploration_id.as_deref() {
            Some(id) => workflow.client().validate_next(workflow.target(), id).await,
            None => Err(anyhow::anyhow!("no exploration id recorded for this session")),
        };
        match finish_step(workflow, &ticket, result) {
            StepResult::Next => tokio::time::sleep(delay).await,
            StepResult::Stop(stop) => return stop,
            StepResult::SettleCancel => {
                workflow.settle_deferred_cancel(generation).await;
                return LoopStop::Cancelled;
            }
        }
    }
}

fn begin_step<C, D>(workflow: &Workflow<C, D>, generation: u64) -> Result<Ticket, LoopStop>
where
    C: ExplorationClient,
    D: DeviceControl,
{
    let mut session = workflow.lock();
    if session.generation != generation {
        return Err(LoopStop::Superseded);
    }
    if session.cancel_requested {
        debug!("validation loop stopped by cancel");
        return Err(LoopStop::Cancelled);
    }
    if session.phase != Phase::AwaitingValidation || session.in_flight {
        debug!(phase = %session.phase, "validation loop has nothing to issue");
        return Err(LoopStop::Superseded);
    }
    session.in_flight = true;
    workflow.apply(&mut session, Event::ValidationIssued);
    Ok(Ticket {
        generation,
        resume: Phase::AwaitingValidation,
        exploration_id: session.exploration_id.clone(),
    })
}

fn finish_step<C, D>(
    workflow: &Workflow<C, D>,
    ticket: &Ticket,
    result: Result<ValidationStep>,
) -> StepResult
where
    C: ExplorationClient,
    D: DeviceControl,
{
    let mut session = match workflow.settle(ticket) {
        Settled::Accepted(session) => session,
        Settled::CancelPending => return StepResult::SettleCancel,
        Settled::Superseded => return StepResult::Stop(LoopStop::Superseded),
    };
    let step = match result {
        Ok(step) => step,
        Err(err) => {
            let outcome = workflow.fail(&mut session, RemoteCall::ValidateNext, ticket.resume, &err);
            return StepResult::Stop(stopped_by(outcome));
        }
    };

    let run = session.validation.get_or_insert(ValidationRun {
        total: 0,
        completed: 0,
    });
    run.completed += 1;
    let ValidationRun { total, completed } = *run;
    info!(completed, total, edge_id = ?step.edge_id, "edge validated");

    let update = match step.progress {
        Some(progress) => ProgressUpdate::validation(progress.current, progress.total),
        None => ProgressUpdate::validation(completed, total),
    };
    workflow.record_progress(&mut session, update);

    if !step.has_more_items {
        workflow.apply(&mut session, Event::NoMoreItems);
        info!(completed, "validation complete");
        return StepResult::Stop(LoopStop::Complete);
    }
    if completed >= total {
        let err = anyhow::anyhow!(
            "service reported more items after {completed} of {total} edges were validated"
        );
        let outcome = workflow.fail(&mut session, RemoteCall::ValidateNext, ticket.resume, &err);
        return StepResult::Stop(stopped_by(outcome));
    }
    workflow.apply(&mut session, Event::MoreItems);
    StepResult::Next
}

fn stopped_by(outcome: CommandOutcome) -> LoopStop {
    match outcome {
        CommandOutcome::Failed { message } => LoopStop::Failed { message },
        _ => LoopStop::Superseded,
    }
}
