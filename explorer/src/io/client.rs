//! Remote exploration client.
//!
//! The [`ExplorationClient`] trait decouples the workflow from the exploration
//! service. Each operation is a single request/response exchange (`start` also
//! polls status until the exploration settles); sequencing and retries belong
//! to the workflow, never to the client. Tests use a scripted client.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{next_poll_delay, remaining_budget};
use crate::core::progress::ProgressUpdate;
use crate::core::selection::Selection;
use crate::core::types::{
    ApprovalReceipt, Depth, ExplorationMode, ExplorationOutcome, FinalizeReceipt, SessionTarget,
    StructureCounts, ValidationStep,
};
use crate::io::config::ExplorerConfig;
use crate::io::wire::{
    ApproveBody, ApproveReply, ContinueReply, EmptyReply, FinalizeReply, SessionBody, StartBody,
    StartReply, StatusReply, ValidateReply, decode_reply,
};

/// Parameters for `start`.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub target: SessionTarget,
    pub depth: Depth,
    pub mode: ExplorationMode,
}

/// Interim events reported while a `start` exchange is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorationEvent {
    /// The service accepted the request and assigned an exploration id.
    Started { exploration_id: String },
    Progress(ProgressUpdate),
    /// The service is still exploring; sent before each wait and each status poll.
    Waiting,
}

/// Receives [`ExplorationEvent`]s in the order the service produced them.
///
/// Returning `Break` abandons the exchange: `start` issues no further
/// requests and fails with [`abandoned`].
pub type EventSink<'a> = &'a (dyn Fn(ExplorationEvent) -> ControlFlow<()> + Send + Sync);

/// Error returned by `start` once its event sink asked it to stop.
pub fn abandoned() -> anyhow::Error {
    anyhow!("exploration abandoned by the caller")
}

/// Deliver `event`, turning a `Break` from the sink into [`abandoned`].
pub fn emit(events: EventSink<'_>, event: ExplorationEvent) -> Result<()> {
    match events(event) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => {
            debug!("event sink abandoned the exploration");
            Err(abandoned())
        }
    }
}

/// Settled result of `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedExploration {
    pub exploration_id: String,
    pub outcome: ExplorationOutcome,
}

#[async_trait]
pub trait ExplorationClient: Send + Sync {
    /// Analyse the current screen and explore until a plan or proposals are ready.
    async fn start(&self, request: &StartRequest, events: EventSink<'_>)
    -> Result<StartedExploration>;

    /// Materialise the approved plan as temporary graph structure.
    async fn continue_exploration(
        &self,
        target: &SessionTarget,
        exploration_id: &str,
    ) -> Result<StructureCounts>;

    /// Replay one created edge and report whether more remain.
    async fn validate_next(
        &self,
        target: &SessionTarget,
        exploration_id: &str,
    ) -> Result<ValidationStep>;

    /// Commit the selected single-shot proposals as permanent graph data.
    async fn approve(
        &self,
        target: &SessionTarget,
        exploration_id: &str,
        selection: &Selection,
    ) -> Result<ApprovalReceipt>;

    /// Strip the temporary marking from validated structure.
    async fn finalize(&self, target: &SessionTarget, exploration_id: &str)
    -> Result<FinalizeReceipt>;

    /// Abort any in-flight remote work tied to the session.
    async fn cancel(&self, target: &SessionTarget, exploration_id: Option<&str>) -> Result<()>;
}

/// Client for the exploration service's JSON-over-HTTP API.
#[derive(Debug, Clone)]
pub struct HttpExplorationClient {
    http: Client,
    base_url: String,
    poll_interval: Duration,
    exploration_timeout: Duration,
}

impl HttpExplorationClient {
    pub fn from_config(cfg: &ExplorerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.service.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: cfg.service.base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(cfg.service.poll_interval_ms),
            exploration_timeout: cfg.exploration_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        info!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("read response body from {url}"))?;
        decode_reply(status, &text).with_context(|| format!("POST {url}"))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("read response body from {url}"))?;
        decode_reply(status, &text).with_context(|| format!("GET {url}"))
    }
}

#[async_trait]
impl ExplorationClient for HttpExplorationClient {
    #[instrument(skip_all, fields(tree_id = %request.target.tree_id, depth = request.depth.get()))]
    async fn start(
        &self,
        request: &StartRequest,
        events: EventSink<'_>,
    ) -> Result<StartedExploration> {
        let deadline = Instant::now() + self.exploration_timeout;
        let body = StartBody {
            session: SessionBody::new(&request.target, None),
            exploration_depth: request.depth.get(),
            mode: request.mode,
        };
        let reply: StartReply = self
            .post("ai-generation/start-exploration", &body)
            .await
            .context("start exploration")?;
        let exploration_id = reply.exploration_id;
        info!(%exploration_id, "exploration started");
        emit(
            events,
            ExplorationEvent::Started {
                exploration_id: exploration_id.clone(),
            },
        )?;

        let mut status = reply.status;
        loop {
            let update = status.progress_update();
            if !update.is_empty() {
                emit(events, ExplorationEvent::Progress(update))?;
            }
            if let Some(outcome) = status.into_outcome()? {
                return Ok(StartedExploration {
                    exploration_id,
                    outcome,
                });
            }
            emit(events, ExplorationEvent::Waiting)?;
            tokio::time::sleep(next_poll_delay(deadline, self.poll_interval)?).await;
            remaining_budget(deadline)?;
            emit(events, ExplorationEvent::Waiting)?;
            status = self
                .get::<StatusReply>(&format!(
                    "ai-generation/exploration-status/{exploration_id}"
                ))
                .await
                .context("poll exploration status")?;
        }
    }

    #[instrument(skip_all, fields(exploration_id = %exploration_id))]
    async fn continue_exploration(
        &self,
        target: &SessionTarget,
        exploration_id: &str,
    ) -> Result<StructureCounts> {
        let reply: ContinueReply = self
            .post(
                "ai-generation/continue-exploration",
                &SessionBody::new(target, Some(exploration_id)),
            )
            .await
            .context("continue exploration")?;
        Ok(reply.into())
    }

    #[instrument(skip_all, fields(exploration_id = %exploration_id))]
    async fn validate_next(
        &self,
        target: &SessionTarget,
        exploration_id: &str,
    ) -> Result<ValidationStep> {
        let reply: ValidateReply = self
            .post(
                "ai-generation/validate-next-item",
                &SessionBody::new(target, Some(exploration_id)),
            )
            .await
            .context("validate next item")?;
        reply.into_step()
    }

    #[instrument(skip_all, fields(exploration_id = %exploration_id, nodes = selection.node_ids.len(), edges = selection.edge_ids.len()))]
    async fn approve(
        &self,
        target: &SessionTarget,
        exploration_id: &str,
        selection: &Selection,
    ) -> Result<ApprovalReceipt> {
        let body = ApproveBody::new(SessionBody::new(target, Some(exploration_id)), selection);
        let reply: ApproveReply = self
            .post("ai-generation/approve-generation", &body)
            .await
            .context("approve generation")?;
        Ok(reply.into())
    }

    #[instrument(skip_all, fields(exploration_id = %exploration_id))]
    async fn finalize(
        &self,
        target: &SessionTarget,
        exploration_id: &str,
    ) -> Result<FinalizeReceipt> {
        let reply: FinalizeReply = self
            .post(
                "ai-generation/finalize-structure",
                &SessionBody::new(target, Some(exploration_id)),
            )
            .await
            .context("finalize structure")?;
        Ok(reply.into())
    }

    #[instrument(skip_all, fields(exploration_id = ?exploration_id))]
    async fn cancel(&self, target: &SessionTarget, exploration_id: Option<&str>) -> Result<()> {
        let result: Result<EmptyReply> = self
            .post(
                "ai-generation/cancel-exploration",
                &SessionBody::new(target, exploration_id),
            )
            .await;
        if let Err(err) = &result {
            warn!(error = %format!("{err:#}"), "cancel request failed");
        }
        result.map(|_| ()).context("cancel exploration")
    }
}
