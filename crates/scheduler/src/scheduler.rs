//! Poll-execute-report orchestration.
//!
//! A single long-lived loop pulls one task at a time from the center,
//! drives it through the engine, and reports the outcome. Each tick
//! re-checks the enable flag, the schedule windows, and engine
//! occupancy before fetching, so the node only works when it is
//! genuinely idle and inside its allowed hours.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fognode_client::{ResultSubmission, TaskClient};
use fognode_comfyui::api::EngineError;
use fognode_comfyui::channel::{EventChannel, EventFeed, HandleSlot};
use fognode_comfyui::gateway::EngineGateway;
use fognode_core::config::FogConfig;
use fognode_core::types::{Task, TaskStatus, Timestamp};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{AggregatedResult, ResultAggregator, WaitOutcome};
use crate::artifacts::{ArtifactStore, collect_artifacts};
use crate::gate;
use crate::history::{HistoryEntry, HistoryLog};
use crate::recovery::run_recovery;

/// How long `stop` waits for the loop to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// History entries surfaced in the status snapshot.
const SNAPSHOT_HISTORY: usize = 5;

/// Why a task cycle did not produce a completed result.
#[derive(Debug, thiserror::Error)]
pub enum CycleFailure {
    /// The engine rejected the workflow at submission.
    #[error("Engine submission failed: {0}")]
    Engine(#[from] EngineError),

    /// The engine accepted the workflow but reported an execution error.
    #[error("Workflow execution failed: {0}")]
    Execution(String),

    /// The event feed dropped and stayed down while waiting.
    #[error("Lost the engine event feed while waiting for results")]
    Feed,

    /// No terminal event arrived within the wait ceiling.
    #[error("Workflow execution timed out after {0:?}")]
    Timeout(Duration),
}

/// Point-in-time view of what the node is doing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub enabled: bool,
    pub current_task_id: Option<String>,
    pub last_error: Option<String>,
    pub recent_history: Vec<HistoryEntry>,
}

/// Shared read handle onto the scheduler's status.
///
/// Cloneable and independent of the scheduler's lifetime, so a status
/// endpoint or diagnostic dump can observe the loop without touching it.
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusHandle {
    /// Current status, copied out.
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.clone()
    }
}

/// Pulls tasks from the center and runs them on the engine.
pub struct TaskScheduler {
    config: FogConfig,
    client: TaskClient,
    gateway: Arc<dyn EngineGateway>,
    channel: EventChannel,
    feed: EventFeed,
    store: Arc<dyn ArtifactStore>,
    history: HistoryLog,
    slot: HandleSlot,
    aggregator: ResultAggregator,
    status: StatusHandle,
}

impl TaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: FogConfig,
        client: TaskClient,
        gateway: Arc<dyn EngineGateway>,
        channel: EventChannel,
        feed: EventFeed,
        store: Arc<dyn ArtifactStore>,
        history: HistoryLog,
        slot: HandleSlot,
    ) -> Self {
        let status = StatusHandle {
            inner: Arc::new(RwLock::new(StatusSnapshot {
                enabled: config.enabled,
                current_task_id: None,
                last_error: None,
                recent_history: history.list(SNAPSHOT_HISTORY, None),
            })),
        };

        Self {
            config,
            client,
            gateway,
            channel,
            feed,
            store,
            history,
            slot,
            aggregator: ResultAggregator::default(),
            status,
        }
    }

    /// Replace the default result-wait pacing.
    pub fn with_aggregator(mut self, aggregator: ResultAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Handle for observing the scheduler from outside the loop.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Spawn the polling loop. The returned handle stops it.
    pub fn start(self, cancel: CancellationToken) -> SchedulerHandle {
        let join = tokio::spawn(self.run(cancel.clone()));
        SchedulerHandle { cancel, join }
    }

    /// One poll cycle at the given wall-clock instant.
    ///
    /// Runs every pre-flight check and then at most one full task.
    /// Skipped cycles are silent at info level; only real work logs.
    pub async fn tick(&mut self, now: Timestamp) {
        if !self.config.enabled {
            return;
        }
        if self.config.task_center_url.is_empty() {
            tracing::debug!("No task center configured, skipping poll");
            return;
        }
        if !gate::is_allowed(now.time(), &self.config.schedule) {
            tracing::trace!("Outside schedule window");
            return;
        }
        if self.gateway.is_busy().await {
            tracing::debug!("Engine busy, skipping poll");
            return;
        }

        let Some(task) = self.client.fetch_task().await else {
            return;
        };
        self.process_task(task).await;
    }

    // ---- private helpers ----

    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.retry_interval,
            "Task scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Task scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
            }
        }

        self.channel.shutdown().await;
    }

    async fn process_task(&mut self, task: Task) {
        tracing::info!(task_id = %task.id, "Processing task");
        self.set_current_task(Some(task.id.clone())).await;

        match self.execute_workflow(&task).await {
            Ok(result) => self.report_success(&task, result).await,
            Err(failure) => self.report_failure(&task, failure).await,
        }

        self.slot.clear().await;
        self.set_current_task(None).await;
    }

    async fn execute_workflow(&mut self, task: &Task) -> Result<AggregatedResult, CycleFailure> {
        let handle = self.gateway.submit(&task.workflow).await?;
        self.slot.set(handle.clone()).await;
        tracing::info!(task_id = %task.id, prompt_id = %handle, "Workflow running");

        match self.aggregator.wait(&mut self.feed).await {
            WaitOutcome::Completed(result) => Ok(result),
            WaitOutcome::Failed(message) => Err(CycleFailure::Execution(message)),
            WaitOutcome::ConnectionLost => Err(CycleFailure::Feed),
            WaitOutcome::TimedOut => Err(CycleFailure::Timeout(self.aggregator.ceiling())),
        }
    }

    async fn report_success(&mut self, task: &Task, result: AggregatedResult) {
        let output = collect_artifacts(self.store.as_ref(), &result).await;
        let image_count = output.images.len();
        let node_count = output.node_outputs.len();

        let output_value = serde_json::to_value(&output).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize output payload");
            serde_json::Value::Null
        });

        let submission = ResultSubmission::completed(task.id.clone(), output_value);
        let accepted = self.submit(&submission).await;
        if !accepted {
            tracing::warn!(task_id = %task.id, "Task center did not accept the result");
        }

        self.history
            .record(HistoryEntry {
                task_id: task.id.clone(),
                timestamp: Utc::now(),
                status: TaskStatus::Completed,
                result: serde_json::json!({
                    "images": image_count,
                    "nodes": node_count,
                    "accepted": accepted,
                }),
            })
            .await;
        self.refresh_status_history().await;
        self.set_last_error(None).await;

        tracing::info!(task_id = %task.id, images = image_count, "Task completed");
    }

    async fn report_failure(&mut self, task: &Task, failure: CycleFailure) {
        let message = failure.to_string();
        tracing::warn!(task_id = %task.id, error = %message, "Task failed");

        let submission = ResultSubmission::failed(task.id.clone(), message.clone());
        self.submit(&submission).await;

        self.history
            .record(HistoryEntry {
                task_id: task.id.clone(),
                timestamp: Utc::now(),
                status: TaskStatus::Failed,
                result: serde_json::json!({ "error": message }),
            })
            .await;
        self.refresh_status_history().await;
        self.set_last_error(Some(message)).await;

        run_recovery(&self.channel, &mut self.feed, &self.slot).await;
    }

    async fn submit(&self, submission: &ResultSubmission) -> bool {
        match self.client.submit_result(submission).await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(
                    task_id = %submission.task_id,
                    error = %e,
                    "Result submission failed",
                );
                false
            }
        }
    }

    async fn set_current_task(&self, task_id: Option<String>) {
        self.status.inner.write().await.current_task_id = task_id;
    }

    async fn set_last_error(&self, error: Option<String>) {
        self.status.inner.write().await.last_error = error;
    }

    async fn refresh_status_history(&self) {
        let recent = self.history.list(SNAPSHOT_HISTORY, None);
        self.status.inner.write().await.recent_history = recent;
    }
}

/// Control handle for a started scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait briefly for the loop to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.join).await.is_err() {
            tracing::warn!("Scheduler did not stop within the grace period");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_name_the_cause() {
        assert_eq!(
            CycleFailure::Execution("CUDA out of memory".to_string()).to_string(),
            "Workflow execution failed: CUDA out of memory",
        );
        assert_eq!(
            CycleFailure::Feed.to_string(),
            "Lost the engine event feed while waiting for results",
        );
        assert_eq!(
            CycleFailure::Timeout(Duration::from_secs(300)).to_string(),
            "Workflow execution timed out after 300s",
        );
    }
}
