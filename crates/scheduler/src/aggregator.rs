//! Terminal-outcome state machine for a submitted workflow.
//!
//! After a workflow is queued, the node sits on the event feed until
//! the workflow completes, the engine reports an error, the feed stays
//! disconnected, or a wait ceiling is reached. Node outputs that stream
//! in along the way are merged into the final result.

use std::collections::BTreeMap;
use std::time::Duration;

use fognode_comfyui::channel::EventFeed;
use fognode_comfyui::events::ResultEvent;
use serde::Serialize;

/// Per-node outputs merged over the lifetime of one workflow.
///
/// Keyed by node id; a node that reports twice keeps its latest output.
/// Ordered so submission payloads are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedResult {
    pub node_outputs: BTreeMap<String, serde_json::Value>,
}

/// Terminal outcome of waiting on one workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// Every node executed; the collected outputs are attached.
    Completed(AggregatedResult),
    /// The engine reported an execution error.
    Failed(String),
    /// The event feed stayed disconnected across consecutive polls.
    ConnectionLost,
    /// No terminal event arrived within the wait ceiling.
    TimedOut,
}

/// Drives an [`EventFeed`] to a [`WaitOutcome`].
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    poll_interval: Duration,
    ceiling: Duration,
}

impl Default for ResultAggregator {
    /// Production pacing: 1 s polls under a 300 s ceiling.
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(300),
        }
    }
}

impl ResultAggregator {
    /// Aggregator with custom pacing.
    pub fn new(poll_interval: Duration, ceiling: Duration) -> Self {
        Self {
            poll_interval,
            ceiling,
        }
    }

    /// Maximum time [`wait`](Self::wait) blocks before giving up.
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Consume feed events until a terminal outcome.
    ///
    /// An empty poll reads the feed's health flag: the first
    /// disconnected observation grants one grace poll for the channel
    /// to reconnect, a second consecutive one gives up.
    pub async fn wait(&self, feed: &mut EventFeed) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + self.ceiling;
        let mut result = AggregatedResult::default();
        let mut unhealthy_polls = 0u32;

        while tokio::time::Instant::now() < deadline {
            match feed.next_timeout(self.poll_interval).await {
                Some(ResultEvent::NodeOutput { node_id, output }) => {
                    tracing::debug!(node_id = %node_id, "Node output collected");
                    result.node_outputs.insert(node_id, output);
                    unhealthy_polls = 0;
                }
                Some(ResultEvent::Completed) => {
                    tracing::info!(nodes = result.node_outputs.len(), "Workflow completed");
                    return WaitOutcome::Completed(result);
                }
                Some(ResultEvent::Error { message }) => {
                    return WaitOutcome::Failed(message);
                }
                None => {
                    if feed.healthy() {
                        unhealthy_polls = 0;
                        continue;
                    }
                    unhealthy_polls += 1;
                    if unhealthy_polls >= 2 {
                        tracing::warn!("Event feed still disconnected, giving up on workflow");
                        return WaitOutcome::ConnectionLost;
                    }
                    tracing::warn!("Event feed disconnected, allowing one poll to reconnect");
                }
            }
        }

        tracing::warn!(
            ceiling = ?self.ceiling,
            "No terminal event within the wait ceiling",
        );
        WaitOutcome::TimedOut
    }
}
