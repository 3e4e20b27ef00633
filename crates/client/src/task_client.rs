//! Task-center HTTP operations: fetch next task, submit result, health probe.
//!
//! Every request goes through the retry wrapper; the public methods then
//! translate what is left into the degrade-don't-raise contract the
//! scheduler relies on (`None` for "no task", `false` for "not submitted").

use std::time::Duration;

use chrono::Utc;
use fognode_core::types::Task;
use reqwest::{Response, StatusCode};

use crate::retry::RetryPolicy;
use crate::submission::ResultSubmission;

/// Timeout for task fetch and result submission.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shorter timeout for the reachability probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced to callers of the task-center client.
///
/// Transport faults never appear here; they are retried and then absorbed
/// into the method contracts. Only payload validation and client
/// construction can fail loudly.
#[derive(Debug, thiserror::Error)]
pub enum TaskClientError {
    /// The result payload would be rejected by the center.
    #[error("Invalid result submission: {0}")]
    Validation(String),

    /// The underlying HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Client for one remote task center.
pub struct TaskClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl TaskClient {
    /// Create a client for the center at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self, TaskClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("fognode/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            retry,
        })
    }

    /// Base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the center for the next task.
    ///
    /// `None` covers every non-delivery outcome: an empty queue (404), an
    /// unexpected status, a malformed body, or a transport failure that
    /// survived the retries. The scheduler simply tries again next tick.
    pub async fn fetch_task(&self) -> Option<Task> {
        let url = format!("{}/task", self.base_url);

        match self.send_with_retry(|| self.http.get(&url)).await {
            Ok(response) => match response.status() {
                StatusCode::OK => match response.json::<Task>().await {
                    Ok(task) => {
                        tracing::info!(task_id = %task.id, "Received task");
                        Some(task)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Task body did not parse");
                        None
                    }
                },
                StatusCode::NOT_FOUND => {
                    tracing::debug!("No tasks available");
                    None
                }
                status => {
                    tracing::warn!(%status, "Task fetch rejected");
                    None
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Task fetch failed");
                None
            }
        }
    }

    /// Report a task outcome to the center.
    ///
    /// Validates the payload before any I/O and stamps `completed_at` when
    /// the caller left it unset. Returns `Ok(true)` only for HTTP 200; any
    /// other status or a transport failure is logged and yields `Ok(false)`.
    pub async fn submit_result(
        &self,
        result: &ResultSubmission,
    ) -> Result<bool, TaskClientError> {
        result.validate()?;

        let mut payload = result.clone();
        if payload.completed_at.is_none() {
            payload.completed_at = Some(Utc::now());
        }

        let url = format!("{}/result", self.base_url);
        match self
            .send_with_retry(|| self.http.post(&url).json(&payload))
            .await
        {
            Ok(response) if response.status() == StatusCode::OK => {
                tracing::info!(
                    task_id = %payload.task_id,
                    status = %payload.status,
                    "Result submitted",
                );
                Ok(true)
            }
            Ok(response) => {
                tracing::warn!(
                    task_id = %payload.task_id,
                    status = %response.status(),
                    "Result submission rejected",
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    task_id = %payload.task_id,
                    error = %e,
                    "Result submission failed",
                );
                Ok(false)
            }
        }
    }

    /// Probe `{base}/health`. Any failure reads as "unreachable".
    pub async fn test_connection(&self) -> bool {
        let url = format!("{}/health", self.base_url);

        match self
            .send_with_retry(|| self.http.get(&url).timeout(HEALTH_TIMEOUT))
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::warn!(error = %e, "Connection test failed");
                false
            }
        }
    }

    // ---- private helpers ----

    /// Send a request, re-sending on gateway-class statuses (500/502/503/504)
    /// and connection-level failures, up to the policy's retry budget.
    ///
    /// The closure builds a fresh request per attempt. Any other outcome
    /// (2xx, 404, client errors) is returned to the caller immediately.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Response, reqwest::Error> {
        let mut attempt = 0u32;

        loop {
            let result = build().send().await;

            let retryable = match &result {
                Ok(response) => RetryPolicy::is_retryable_status(response.status().as_u16()),
                Err(e) => e.is_connect() || e.is_timeout(),
            };

            if !retryable || attempt >= self.retry.max_retries {
                return result;
            }

            attempt += 1;
            let delay = self.retry.delay_for(attempt);
            match &result {
                Ok(response) => tracing::debug!(
                    status = %response.status(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying task-center request",
                ),
                Err(e) => tracing::debug!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying task-center request",
                ),
            }
            tokio::time::sleep(delay).await;
        }
    }
}
