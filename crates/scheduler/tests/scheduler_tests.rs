//! Full scheduler cycles against a mock task center.
//!
//! Each test stages the event feed and a fake engine gateway, drives
//! `tick` directly, and asserts on what actually reached the center,
//! the history file, and the status snapshot.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use fognode_client::{RetryPolicy, TaskClient};
use fognode_comfyui::api::EngineError;
use fognode_comfyui::channel::{EventChannel, EventFeed, FeedWriter, HandleSlot};
use fognode_comfyui::events::ResultEvent;
use fognode_comfyui::gateway::EngineGateway;
use fognode_comfyui::reconnect::ReconnectConfig;
use fognode_core::config::{FogConfig, ScheduleWindow};
use fognode_core::types::{ExecutionHandle, TaskStatus, Timestamp};
use fognode_scheduler::aggregator::ResultAggregator;
use fognode_scheduler::artifacts::OutputDir;
use fognode_scheduler::history::HistoryLog;
use fognode_scheduler::scheduler::TaskScheduler;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Gateway double: a canned handle plus knobs for the skip paths.
struct FakeEngine {
    busy: AtomicBool,
    fail_submit: AtomicBool,
    handle: String,
    submissions: Mutex<Vec<serde_json::Value>>,
}

impl FakeEngine {
    fn new(handle: &str) -> Self {
        Self {
            busy: AtomicBool::new(false),
            fail_submit: AtomicBool::new(false),
            handle: handle.to_string(),
            submissions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EngineGateway for FakeEngine {
    async fn submit(&self, workflow: &serde_json::Value) -> Result<ExecutionHandle, EngineError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(EngineError::EmptyWorkflow);
        }
        self.submissions.lock().await.push(workflow.clone());
        Ok(ExecutionHandle::from(self.handle.clone()))
    }

    async fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

struct TestNode {
    scheduler: TaskScheduler,
    writer: FeedWriter,
    engine: Arc<FakeEngine>,
    slot: HandleSlot,
    history_path: PathBuf,
    output_root: PathBuf,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

fn test_config(server: &MockServer) -> FogConfig {
    FogConfig {
        enabled: true,
        task_center_url: server.uri(),
        retry_interval: 1,
        ..FogConfig::default()
    }
}

/// Wire a scheduler exactly as the worker does, with test pacing and a
/// staged feed in place of the live socket.
async fn build_node(config: FogConfig) -> TestNode {
    let cancel = CancellationToken::new();
    let slot = HandleSlot::new();

    // The channel itself points at a dead port; recovery exercises it
    // without a live engine. Events come from the detached writer.
    let (channel, _socket_feed) = EventChannel::start(
        "ws://127.0.0.1:9".to_string(),
        "node-under-test".to_string(),
        slot.clone(),
        ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
        },
        cancel.child_token(),
    );
    let (writer, feed) = EventFeed::detached();

    let client = TaskClient::new(
        config.task_center_url.clone(),
        RetryPolicy {
            max_retries: 1,
            backoff_base: Duration::from_millis(5),
        },
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let output_root = dir.path().join("output");
    std::fs::create_dir(&output_root).unwrap();
    let history_path = dir.path().join("history.json");

    let engine = Arc::new(FakeEngine::new("prompt-42"));
    let history = HistoryLog::load(&history_path).await;

    let scheduler = TaskScheduler::new(
        config,
        client,
        engine.clone(),
        channel,
        feed,
        Arc::new(OutputDir::new(&output_root)),
        history,
        slot.clone(),
    )
    .with_aggregator(ResultAggregator::new(
        Duration::from_millis(20),
        Duration::from_millis(250),
    ));

    TestNode {
        scheduler,
        writer,
        engine,
        slot,
        history_path,
        output_root,
        cancel,
        _dir: dir,
    }
}

async fn mount_task(server: &MockServer, task_id: &str) {
    let task = serde_json::json!({
        "id": task_id,
        "workflow": { "3": { "class_type": "KSampler", "inputs": {} } },
        "created_at": "2025-03-01T10:00:00Z",
    });
    Mock::given(method("GET"))
        .and(path("/task"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&task))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_result(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/result"))
        .respond_with(ResponseTemplate::new(status))
        .expect(1)
        .mount(server)
        .await;
}

/// The body of the single result submission the center received.
async fn result_body(server: &MockServer) -> serde_json::Value {
    let requests = server.received_requests().await.unwrap();
    let report = requests
        .iter()
        .find(|r| r.url.path() == "/result")
        .expect("no result submission reached the center");
    serde_json::from_slice(&report.body).unwrap()
}

#[tokio::test]
async fn completed_task_reports_inlined_artifacts() {
    let server = MockServer::start().await;
    mount_task(&server, "task-001").await;
    mount_result(&server, 200).await;

    let mut node = build_node(test_config(&server)).await;

    // Artifact on disk, plus the events announcing it.
    std::fs::write(node.output_root.join("img_0001.png"), b"fake png bytes").unwrap();
    node.writer.push(ResultEvent::NodeOutput {
        node_id: "9".to_string(),
        output: serde_json::json!({
            "images": [{ "filename": "img_0001.png", "type": "output" }],
        }),
    });
    node.writer.push(ResultEvent::Completed);

    node.scheduler.tick(Utc::now()).await;

    let body = result_body(&server).await;
    assert_eq!(body["task_id"], "task-001");
    assert_eq!(body["status"], "completed");
    assert!(body["completed_at"].is_string());

    let images = body["output"]["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["filename"], "img_0001.png");
    assert_eq!(images[0]["node_id"], "9");
    assert_eq!(images[0]["data"], STANDARD.encode(b"fake png bytes"));
    assert_eq!(
        body["output"]["node_outputs"]["9"]["images"][0]["filename"],
        "img_0001.png",
    );

    // The workflow reached the engine untouched.
    let submissions = node.engine.submissions.lock().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0]["3"]["class_type"], "KSampler");
    drop(submissions);

    let history = HistoryLog::load(&node.history_path).await;
    let entries = history.list(10, None);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].task_id, "task-001");
    assert_eq!(entries[0].status, TaskStatus::Completed);
    assert_eq!(entries[0].result["images"], 1);
    assert_eq!(entries[0].result["accepted"], true);

    let status = node.scheduler.status_handle().snapshot().await;
    assert!(status.current_task_id.is_none());
    assert!(status.last_error.is_none());
    assert_eq!(status.recent_history.len(), 1);
    assert!(node.slot.get().await.is_none());

    node.cancel.cancel();
}

#[tokio::test]
async fn execution_error_reports_failure_and_clears_the_slot() {
    let server = MockServer::start().await;
    mount_task(&server, "task-002").await;
    mount_result(&server, 200).await;

    let mut node = build_node(test_config(&server)).await;
    node.writer.push(ResultEvent::Error {
        message: "CUDA out of memory".to_string(),
    });

    node.scheduler.tick(Utc::now()).await;

    let body = result_body(&server).await;
    assert_eq!(body["status"], "failed");
    let error_text = body["error"].as_str().unwrap();
    assert!(
        error_text.contains("CUDA out of memory"),
        "unexpected error text: {error_text}",
    );

    let history = HistoryLog::load(&node.history_path).await;
    let entries = history.list(10, None);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, TaskStatus::Failed);

    let status = node.scheduler.status_handle().snapshot().await;
    assert!(status
        .last_error
        .as_deref()
        .unwrap()
        .contains("CUDA out of memory"));
    assert!(node.slot.get().await.is_none());

    node.cancel.cancel();
}

#[tokio::test]
async fn silent_engine_times_out_and_reports_failure() {
    let server = MockServer::start().await;
    mount_task(&server, "task-003").await;
    mount_result(&server, 200).await;

    let mut node = build_node(test_config(&server)).await;
    // No events at all: the wait must give up at its ceiling.
    node.scheduler.tick(Utc::now()).await;

    let body = result_body(&server).await;
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("timed out"));

    node.cancel.cancel();
}

#[tokio::test]
async fn dead_feed_reports_a_feed_failure() {
    let server = MockServer::start().await;
    mount_task(&server, "task-004").await;
    mount_result(&server, 200).await;

    let mut node = build_node(test_config(&server)).await;
    node.writer.set_connected(false);

    node.scheduler.tick(Utc::now()).await;

    let body = result_body(&server).await;
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("event feed"));

    node.cancel.cancel();
}

#[tokio::test]
async fn submission_rejection_reports_failure() {
    let server = MockServer::start().await;
    mount_task(&server, "task-005").await;
    mount_result(&server, 200).await;

    let mut node = build_node(test_config(&server)).await;
    node.engine.fail_submit.store(true, Ordering::SeqCst);

    node.scheduler.tick(Utc::now()).await;

    let body = result_body(&server).await;
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("Workflow is empty"));

    let history = HistoryLog::load(&node.history_path).await;
    assert_eq!(history.list(10, None)[0].status, TaskStatus::Failed);

    node.cancel.cancel();
}

#[tokio::test]
async fn rejected_result_is_recorded_as_unaccepted() {
    let server = MockServer::start().await;
    mount_task(&server, "task-006").await;
    mount_result(&server, 400).await;

    let mut node = build_node(test_config(&server)).await;
    node.writer.push(ResultEvent::Completed);

    node.scheduler.tick(Utc::now()).await;

    let history = HistoryLog::load(&node.history_path).await;
    let entries = history.list(10, None);
    assert_eq!(entries[0].status, TaskStatus::Completed);
    assert_eq!(entries[0].result["accepted"], false);

    node.cancel.cancel();
}

#[tokio::test]
async fn closed_schedule_window_skips_the_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/task"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.schedule = vec![ScheduleWindow {
        start: "00:00".to_string(),
        end: "00:01".to_string(),
    }];
    let mut node = build_node(config).await;

    let noon: Timestamp = "2025-03-01T12:00:00Z".parse().unwrap();
    node.scheduler.tick(noon).await;

    node.cancel.cancel();
}

#[tokio::test]
async fn busy_engine_skips_the_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/task"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut node = build_node(test_config(&server)).await;
    node.engine.busy.store(true, Ordering::SeqCst);

    node.scheduler.tick(Utc::now()).await;

    node.cancel.cancel();
}

#[tokio::test]
async fn disabled_node_never_polls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/task"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.enabled = false;
    let mut node = build_node(config).await;

    node.scheduler.tick(Utc::now()).await;

    node.cancel.cancel();
}
