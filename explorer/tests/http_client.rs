//! `HttpExplorationClient` against a local stub of the exploration service.
//!
//! The stub answers with canned JSON and records every request, so these
//! tests see exactly what went over the wire and when polling stopped.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde_json::{Value, json};

use explorer::core::phase::Phase;
use explorer::core::selection::Selection;
use explorer::core::types::{Depth, ExplorationMode, ExplorationOutcome};
use explorer::io::client::{
    ExplorationClient, ExplorationEvent, HttpExplorationClient, StartRequest,
};
use explorer::io::config::ExplorerConfig;
use explorer::test_support::{FakeDevice, settings, target};
use explorer::workflow::{CommandOutcome, Workflow};

const STATUS_PATH: &str = "exploration-status/exp-7";

/// Canned service behaviour plus a log of `(path, body)` for every request.
struct Service {
    /// Replies for status polls; the last one repeats.
    statuses: Mutex<VecDeque<Value>>,
    cancel_status: StatusCode,
    requests: Mutex<Vec<(String, Value)>>,
}

impl Service {
    fn new(statuses: Vec<Value>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            cancel_status: StatusCode::OK,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing_cancel(mut self) -> Self {
        self.cancel_status = StatusCode::INTERNAL_SERVER_ERROR;
        self
    }

    fn record(&self, path: &str, body: Value) {
        self.requests
            .lock()
            .expect("requests")
            .push((path.to_string(), body));
    }

    fn bodies(&self, path: &str) -> Vec<Value> {
        self.requests
            .lock()
            .expect("requests")
            .iter()
            .filter(|(recorded, _)| recorded == path)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn count(&self, path: &str) -> usize {
        self.bodies(path).len()
    }
}

async fn start_exploration(
    State(service): State<Arc<Service>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    service.record("start-exploration", body);
    Json(json!({
        "success": true,
        "exploration_id": "exp-7",
        "status": "starting",
        "current_step": "capturing screen"
    }))
}

async fn exploration_status(
    State(service): State<Arc<Service>>,
    Path(exploration_id): Path<String>,
) -> Json<Value> {
    service.record(&format!("exploration-status/{exploration_id}"), Value::Null);
    let mut statuses = service.statuses.lock().expect("statuses");
    let reply = if statuses.len() > 1 {
        statuses.pop_front()
    } else {
        statuses.front().cloned()
    };
    Json(reply.unwrap_or_else(|| json!({"status": "exploring"})))
}

async fn cancel_exploration(
    State(service): State<Arc<Service>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    service.record("cancel-exploration", body);
    let status = service.cancel_status;
    let reply = if status.is_success() {
        json!({"success": true})
    } else {
        json!({"success": false, "error": "abort failed"})
    };
    (status, Json(reply))
}

async fn approve_generation(
    State(service): State<Arc<Service>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    service.record("approve-generation", body);
    Json(json!({"success": true, "nodes_added": 1, "edges_added": 0}))
}

/// Serve `service` on an ephemeral port and return its base URL.
async fn serve(service: Service) -> (Arc<Service>, String) {
    let service = Arc::new(service);
    let app = Router::new()
        .route("/ai-generation/start-exploration", post(start_exploration))
        .route(
            "/ai-generation/exploration-status/{exploration_id}",
            get(exploration_status),
        )
        .route("/ai-generation/cancel-exploration", post(cancel_exploration))
        .route("/ai-generation/approve-generation", post(approve_generation))
        .with_state(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub service");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub service");
    });
    (service, format!("http://{addr}"))
}

fn client(base_url: &str, exploration_timeout_secs: u64) -> HttpExplorationClient {
    let mut cfg = ExplorerConfig::default();
    cfg.service.base_url = base_url.to_string();
    cfg.service.poll_interval_ms = 10;
    cfg.exploration_timeout_secs = exploration_timeout_secs;
    HttpExplorationClient::from_config(&cfg).expect("client")
}

fn request() -> StartRequest {
    StartRequest {
        target: target(),
        depth: Depth::new(5).expect("depth"),
        mode: ExplorationMode::Incremental,
    }
}

fn exploring() -> Value {
    json!({"status": "exploring"})
}

#[tokio::test]
async fn start_polls_status_until_the_plan_is_ready() {
    let (service, base_url) = serve(Service::new(vec![
        json!({"status": "exploring", "progress": {"screens_analyzed": 1}}),
        json!({
            "status": "awaiting_approval",
            "exploration_plan": {"menu_type": "horizontal", "items": ["live", "guide", "apps"]}
        }),
    ]))
    .await;
    let events = Mutex::new(Vec::new());
    let sink = |event: ExplorationEvent| {
        events.lock().expect("events").push(event);
        ControlFlow::Continue(())
    };

    let started = client(&base_url, 30)
        .start(&request(), &sink)
        .await
        .expect("start");

    assert_eq!(started.exploration_id, "exp-7");
    match started.outcome {
        ExplorationOutcome::Plan(plan) => assert_eq!(plan.items, ["live", "guide", "apps"]),
        other => panic!("expected a plan, got {other:?}"),
    }
    assert_eq!(service.count(STATUS_PATH), 2);

    let body = &service.bodies("start-exploration")[0];
    assert_eq!(body["tree_id"], "tree-1");
    assert_eq!(body["host_name"], "host-a");
    assert_eq!(body["device_id"], "device1");
    assert_eq!(body["exploration_depth"], 5);
    assert_eq!(body["mode"], "incremental");

    let events = events.into_inner().expect("events");
    assert_eq!(
        events[0],
        ExplorationEvent::Started {
            exploration_id: "exp-7".to_string()
        }
    );
    let screens: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            ExplorationEvent::Progress(update) => update.screens_analyzed,
            _ => None,
        })
        .collect();
    assert_eq!(screens, [1]);
}

#[tokio::test]
async fn failed_status_ends_start_with_the_server_error() {
    let (service, base_url) = serve(Service::new(vec![
        exploring(),
        json!({"status": "failed", "error": "device unreachable"}),
    ]))
    .await;
    let sink = |_: ExplorationEvent| ControlFlow::Continue(());

    let err = client(&base_url, 30)
        .start(&request(), &sink)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("device unreachable"), "{err:#}");
    assert_eq!(service.count(STATUS_PATH), 2);
}

#[tokio::test]
async fn start_gives_up_when_the_exploration_budget_is_spent() {
    let (_service, base_url) = serve(Service::new(vec![exploring()])).await;
    let sink = |_: ExplorationEvent| ControlFlow::Continue(());

    let err = client(&base_url, 1)
        .start(&request(), &sink)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("timed out"), "{err:#}");
}

#[tokio::test]
async fn sink_break_stops_status_polls() {
    let (service, base_url) = serve(Service::new(vec![exploring()])).await;
    let waits = Mutex::new(0);
    let sink = |event: ExplorationEvent| {
        if event != ExplorationEvent::Waiting {
            return ControlFlow::Continue(());
        }
        let mut waits = waits.lock().expect("waits");
        *waits += 1;
        if *waits < 3 {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    };

    let err = client(&base_url, 30)
        .start(&request(), &sink)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("abandoned"), "{err:#}");
    assert_eq!(service.count(STATUS_PATH), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.count(STATUS_PATH), 1);
}

#[tokio::test]
async fn cancel_mid_exploring_stops_status_polls_even_if_the_abort_fails() {
    let (service, base_url) = serve(Service::new(vec![exploring()]).failing_cancel()).await;
    let wf = Arc::new(Workflow::new(
        client(&base_url, 30),
        FakeDevice::controlled(),
        target(),
        settings(),
    ));

    let start = tokio::spawn({
        let wf = Arc::clone(&wf);
        async move { wf.start(5).await }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.count(STATUS_PATH) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("status polls begin");

    assert_eq!(wf.cancel().await, CommandOutcome::Applied);
    assert_eq!(wf.phase(), Phase::Cancelled);

    let outcome = tokio::time::timeout(Duration::from_secs(2), start)
        .await
        .expect("start stops after cancel")
        .expect("join");
    assert_eq!(outcome, CommandOutcome::Discarded);

    let polls = service.count(STATUS_PATH);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.count(STATUS_PATH), polls);
    assert_eq!(wf.phase(), Phase::Cancelled);

    let cancels = service.bodies("cancel-exploration");
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0]["exploration_id"], "exp-7");
}

#[tokio::test]
async fn cancel_reports_a_non_success_reply() {
    let (service, base_url) = serve(Service::new(Vec::new()).failing_cancel()).await;

    let err = client(&base_url, 30)
        .cancel(&target(), Some("exp-7"))
        .await
        .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("500"), "{message}");
    assert!(message.contains("abort failed"), "{message}");
    assert_eq!(
        service.bodies("cancel-exploration")[0]["exploration_id"],
        "exp-7"
    );
}

#[tokio::test]
async fn approve_sends_the_selected_ids() {
    let (service, base_url) = serve(Service::new(Vec::new())).await;
    let selection = Selection {
        node_ids: vec!["live".to_string()],
        edge_ids: vec!["home-live".to_string()],
    };

    let receipt = client(&base_url, 30)
        .approve(&target(), "exp-7", &selection)
        .await
        .expect("approve");

    assert_eq!(receipt.nodes_added, 1);
    let body = &service.bodies("approve-generation")[0];
    assert_eq!(body["exploration_id"], "exp-7");
    assert_eq!(body["approved_nodes"], json!(["live"]));
    assert_eq!(body["approved_edges"], json!(["home-live"]));
}
