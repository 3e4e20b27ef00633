//! REST client for the local engine's HTTP endpoints.
//!
//! Wraps the two ComfyUI calls the node needs: queuing a workflow via
//! `POST /prompt` and reading queue occupancy via `GET /queue`.

use serde::Deserialize;

/// HTTP client for the local engine.
pub struct EngineApi {
    client: reqwest::Client,
    api_url: String,
    /// Client id sent with every submission so the engine routes the
    /// resulting WebSocket events to this node's socket.
    client_id: String,
}

/// Response returned by `POST /prompt` after a workflow is queued.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Engine-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    pub number: i32,
}

/// Snapshot of the engine's execution queue from `GET /queue`.
#[derive(Debug, Default, Deserialize)]
pub struct QueueState {
    #[serde(default)]
    pub queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue_pending: Vec<serde_json::Value>,
}

impl QueueState {
    /// The engine is busy when anything is running or waiting.
    pub fn is_busy(&self) -> bool {
        !self.queue_running.is_empty() || !self.queue_pending.is_empty()
    }
}

/// Errors from the engine REST layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The workflow was empty or not a JSON object; rejected before
    /// any request is sent.
    #[error("Workflow is empty")]
    EmptyWorkflow,

    /// The HTTP request itself failed (connection refused, timeout, ...).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The engine returned a non-2xx status code.
    #[error("Engine API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl EngineApi {
    /// Create a new API client.
    ///
    /// * `api_url`   - base HTTP URL, e.g. `http://127.0.0.1:8188`.
    /// * `client_id` - stable id shared with the event channel handshake.
    pub fn new(api_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            client_id: client_id.into(),
        }
    }

    /// Submit a workflow for execution.
    ///
    /// Rejects empty or non-object workflows locally, then sends
    /// `POST /prompt` with `{prompt, client_id}` and returns the
    /// engine-assigned prompt id and queue position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, EngineError> {
        match workflow.as_object() {
            Some(nodes) if !nodes.is_empty() => {}
            _ => return Err(EngineError::EmptyWorkflow),
        }

        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Read the engine's queue occupancy.
    pub async fn queue_state(&self) -> Result<QueueState, EngineError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, then parse its
    /// JSON body into the expected type. Non-2xx responses become
    /// [`EngineError::Api`] with the body text preserved.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EngineError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}
