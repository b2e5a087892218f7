// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use luna_config::model::{ControllerConfig, LunaConfig};
use luna_core::{LeafExecutor, LeafTask, LunaError};
use luna_gateway::{AuthConfig, GatewayState, router};
use luna_journal::{FunctionRegistry, HaController, Journal, JournalRequest, PeerClient};
use luna_mother::{
    CoordinatorSettings, Dispatcher, MotherCoordinator, NewTask, StatusChannel, TaskQueue,
    register_task_handlers,
};
use luna_storage::Database;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const TOKEN: &str = "secret-token";

#[derive(Default)]
struct Recorder {
    calls: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl LeafExecutor for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn run(&self, task: &LeafTask) -> Result<String, LunaError> {
        self.calls.lock().unwrap().push(task.descriptor.to_string());
        Ok(String::new())
    }
}

struct Harness {
    router: Router,
    dispatcher: Dispatcher,
    journal: Journal,
    executor: Arc<Recorder>,
    _dir: TempDir,
}

enum Cluster {
    Standalone,
    /// HA pair ctrl1 + ctrl2, this controller is `me`.
    Pair { me: &'static str, insync: bool },
}

async fn harness(cluster: Cluster, token: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_path(dir.path().join("luna.db")).await.unwrap();

    let mut config = LunaConfig::default();
    config.daemon.hostname = "ctrl1".to_string();
    let mut insync = true;
    if let Cluster::Pair { me, insync: synced } = cluster {
        config.daemon.hostname = me.to_string();
        config.ha.enabled = true;
        // Nothing listens on the discard port; pushes fail fast.
        config.ha.controllers = ["ctrl1", "ctrl2"]
            .iter()
            .map(|host| ControllerConfig {
                hostname: host.to_string(),
                endpoint: "http://127.0.0.1:9".to_string(),
                relay: None,
                shadow: false,
            })
            .collect();
        insync = synced;
    }

    let ha = Arc::new(
        HaController::init(db.clone(), &config)
            .await
            .unwrap()
            .with_insync_poll(Duration::from_millis(10)),
    );
    if config.ha.enabled {
        ha.set_insync(insync).await.unwrap();
    }
    let registry = Arc::new(FunctionRegistry::new());
    let client = PeerClient::new(Some(TOKEN), Duration::from_millis(500)).unwrap();
    let journal = Journal::new(db.clone(), ha.clone(), registry.clone(), client);

    let executor = Arc::new(Recorder::default());
    let coordinator = Arc::new(MotherCoordinator::new(
        TaskQueue::new(db.clone()),
        StatusChannel::new(db.clone()),
        executor.clone(),
        CoordinatorSettings::default(),
    ));
    let dispatcher = Dispatcher::start(
        coordinator,
        Duration::from_millis(300),
        CancellationToken::new(),
    );
    register_task_handlers(&registry, ha, dispatcher.clone());

    let state = GatewayState::new(
        dispatcher.clone(),
        journal.clone(),
        AuthConfig::new(token.map(str::to_string)),
    );
    Harness {
        router: router(state),
        dispatcher,
        journal,
        executor,
        _dir: dir,
    }
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let parsed = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, parsed)
}

#[tokio::test]
async fn health_is_public() {
    let h = harness(Cluster::Standalone, None).await;
    let (status, body) = call(&h.router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "master");
    assert_eq!(body["insync"], true);
    assert_eq!(body["hostname"], "ctrl1");
}

#[tokio::test]
async fn authenticated_routes_fail_closed() {
    let h = harness(Cluster::Standalone, None).await;
    let (status, _) = call(&h.router, Method::GET, "/journal/ctrl2", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let h = harness(Cluster::Standalone, Some(TOKEN)).await;
    let (status, _) = call(&h.router, Method::GET, "/journal/ctrl2", Some("guess"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&h.router, Method::GET, "/journal/ctrl2", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, body) = call(&h.router, Method::GET, "/journal/ctrl2", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"journal": []}));
}

#[tokio::test]
async fn status_is_read_once_then_gone() {
    let h = harness(Cluster::Standalone, Some(TOKEN)).await;
    let status = h.dispatcher.status();
    status.add_message("r1", "luna", "pack_osimage img1 started").await.unwrap();
    status.add_eof("r1", "luna").await.unwrap();

    let (code, body) = call(&h.router, Method::GET, "/status/r1", None, None).await;
    assert_eq!(code, StatusCode::OK);
    let message = body["message"].as_str().unwrap();
    assert!(message.ends_with(":: pack_osimage img1 started"), "{message}");

    let (code, body) = call(&h.router, Method::GET, "/status/r1", None, None).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("r1"));
}

#[tokio::test]
async fn submitted_task_runs_and_reports() {
    let h = harness(Cluster::Standalone, Some(TOKEN)).await;
    let (code, body) = call(
        &h.router,
        Method::POST,
        "/tasks/control",
        Some(TOKEN),
        Some(json!({"verb": "power_on", "object": "node001"})),
    )
    .await;
    assert_eq!(code, StatusCode::OK, "{body}");
    assert_eq!(body["complete"], true);
    assert!(
        body["message"].as_str().unwrap().contains("power_on node001 finished"),
        "{body}"
    );
    assert_eq!(*h.executor.calls.lock().unwrap(), vec!["power_on:node001"]);
}

#[tokio::test]
async fn submission_is_validated() {
    let h = harness(Cluster::Standalone, Some(TOKEN)).await;
    let (code, _) = call(
        &h.router,
        Method::POST,
        "/tasks/control",
        Some(TOKEN),
        Some(json!({"verb": "pack_osimage", "object": "img1"})),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, _) = call(
        &h.router,
        Method::POST,
        "/tasks/network",
        Some(TOKEN),
        Some(json!({"verb": "power_on", "object": "node001"})),
    )
    .await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    let (code, body) = call(
        &h.router,
        Method::POST,
        "/tasks/osimage",
        Some(TOKEN),
        Some(json!({"verb": "clone_osimage", "object": "img1"})),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("clone_osimage"));
}

#[tokio::test]
async fn backup_leaves_control_tasks_to_the_master() {
    let h = harness(Cluster::Pair { me: "ctrl2", insync: true }, Some(TOKEN)).await;
    let (code, body) = call(
        &h.router,
        Method::POST,
        "/tasks/control",
        Some(TOKEN),
        Some(json!({"verb": "power_off", "object": "node007"})),
    )
    .await;
    assert_eq!(code, StatusCode::ACCEPTED, "{body}");
    assert!(body["message"].as_str().unwrap().contains("forwarded to ctrl1"));

    let pending = h.journal.entries_for("ctrl1").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].function, "Control.power_off");
    assert_eq!(pending[0].object, "node007");
    assert!(pending[0].masteronly);
    assert!(h.executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_submission_is_not_journaled() {
    let h = harness(Cluster::Pair { me: "ctrl1", insync: true }, Some(TOKEN)).await;
    let waiting = NewTask::parse("pack_osimage:img1", "osimage", "r-first")
        .unwrap()
        .parked();
    let enqueued = h.dispatcher.queue().add_task(waiting).await.unwrap();
    assert!(enqueued.is_added());

    let (code, body) = call(
        &h.router,
        Method::POST,
        "/tasks/osimage",
        Some(TOKEN),
        Some(json!({"verb": "pack_osimage", "object": "img1"})),
    )
    .await;
    assert_eq!(code, StatusCode::ACCEPTED, "{body}");
    assert_eq!(body["request_id"], "r-first");
    assert_eq!(body["message"], "already queued");
    assert!(h.journal.entries_for("ctrl2").await.unwrap().is_empty());
    assert_eq!(h.dispatcher.queue().list_tasks(Some("osimage")).await.unwrap().len(), 1);
    assert!(h.executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn out_of_sync_controller_refuses_replicated_work() {
    let h = harness(Cluster::Pair { me: "ctrl1", insync: false }, Some(TOKEN)).await;
    let (code, body) = call(
        &h.router,
        Method::POST,
        "/tasks/osimage",
        Some(TOKEN),
        Some(json!({"verb": "pack_osimage", "object": "img1"})),
    )
    .await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE, "{body}");
    assert!(h.executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn pushed_journal_is_applied() {
    let h = harness(Cluster::Pair { me: "ctrl1", insync: true }, Some(TOKEN)).await;
    let (code, body) = call(
        &h.router,
        Method::POST,
        "/journal",
        Some(TOKEN),
        Some(json!({"journal": [{
            "function": "Status.add_message",
            "object": "req-9",
            "param": "image synced on ctrl2",
            "sendby": "ctrl2",
            "sendfor": "ctrl1",
        }]})),
    )
    .await;
    assert_eq!(code, StatusCode::OK, "{body}");
    assert_eq!(body["inbound"], 1);

    let mut seen = None;
    for _ in 0..200 {
        if let Some(report) = h.dispatcher.status().get_status("req-9").await.unwrap() {
            seen = Some(report.message);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seen.unwrap().contains("image synced on ctrl2"));
}

#[tokio::test]
async fn pulled_rows_are_deleted_up_to_the_acknowledged_id() {
    let h = harness(Cluster::Pair { me: "ctrl1", insync: true }, Some(TOKEN)).await;
    for line in ["first", "second"] {
        h.journal
            .add_request(
                JournalRequest::new("Status.add_message", "req-1")
                    .param(line)
                    .sendnow(false),
            )
            .await
            .unwrap();
    }

    let (code, body) = call(&h.router, Method::GET, "/journal/ctrl2", Some(TOKEN), None).await;
    assert_eq!(code, StatusCode::OK);
    let rows = body["journal"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    let first_id = rows[0]["id"].as_i64().unwrap();

    let uri = format!("/journal/ctrl2/_delete?upto={first_id}");
    let (code, body) = call(&h.router, Method::GET, &uri, Some(TOKEN), None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let (_, body) = call(&h.router, Method::GET, "/journal/ctrl2", Some(TOKEN), None).await;
    assert_eq!(body["journal"][0]["param"], "second");

    let (_, body) = call(&h.router, Method::GET, "/journal/ctrl2/_delete", Some(TOKEN), None).await;
    assert_eq!(body["deleted"], 1);
}

#[tokio::test]
async fn master_role_moves_on_request() {
    let h = harness(Cluster::Pair { me: "ctrl1", insync: true }, Some(TOKEN)).await;
    let (code, body) = call(
        &h.router,
        Method::POST,
        "/ha/master",
        Some(TOKEN),
        Some(json!({"host": "ctrl2"})),
    )
    .await;
    assert_eq!(code, StatusCode::OK, "{body}");
    assert_eq!(body["role"], "backup");

    let (code, _) = call(
        &h.router,
        Method::POST,
        "/ha/master",
        Some(TOKEN),
        Some(json!({"host": "ctrl9"})),
    )
    .await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (_, health) = call(&h.router, Method::GET, "/health", None, None).await;
    assert_eq!(health["master"], "ctrl2");
}
