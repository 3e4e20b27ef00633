//! Task-center and engine data model shared across the worker crates.

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A workflow job handed out by the task center.
///
/// Immutable once fetched; owned by the orchestrator for the duration of
/// one processing cycle and discarded after a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Center-assigned task identifier, echoed back on submission.
    pub id: String,
    /// Opaque workflow description, forwarded to the engine untouched.
    pub workflow: serde_json::Value,
    /// When the center created the task. Not all centers send it.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// Identifier the engine assigns to one submitted workflow.
///
/// Valid only while that task is being processed; cleared before the next
/// fetch so stale feed events can never leak into a new task's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle(pub String);

impl ExecutionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ExecutionHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Terminal outcome of one task, as reported to the center and history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

impl TaskStatus {
    /// Wire representation used in submission payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Error for status strings that are neither `completed` nor `failed`.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("Unknown task status: {0:?}")]
pub struct ParseStatusError(String);

impl std::str::FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
