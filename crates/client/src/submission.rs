//! Result payload submitted back to the task center.

use fognode_core::types::{TaskStatus, Timestamp};
use serde::Serialize;

use crate::task_client::TaskClientError;

/// Body of `POST {base}/result`.
///
/// `status` stays a plain wire string so that whatever a caller assembled
/// can be validated in one place before any network traffic; the
/// [`completed`](Self::completed) and [`failed`](Self::failed) constructors
/// always produce valid payloads.
#[derive(Debug, Clone, Serialize)]
pub struct ResultSubmission {
    pub task_id: String,
    pub status: String,
    /// Filled with the current time at submission when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Collected output for completed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure description for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultSubmission {
    /// Successful-outcome payload carrying the collected output.
    pub fn completed(task_id: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed.as_str().to_string(),
            completed_at: None,
            output: Some(output),
            error: None,
        }
    }

    /// Failed-outcome payload carrying the error text.
    pub fn failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed.as_str().to_string(),
            completed_at: None,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Reject payloads the center would not accept: a missing task id or a
    /// status outside `completed`/`failed`.
    pub fn validate(&self) -> Result<(), TaskClientError> {
        if self.task_id.is_empty() {
            return Err(TaskClientError::Validation(
                "result submission is missing task_id".to_string(),
            ));
        }
        if self.status.parse::<TaskStatus>().is_err() {
            return Err(TaskClientError::Validation(format!(
                "invalid status value: {:?}",
                self.status
            )));
        }
        Ok(())
    }
}
