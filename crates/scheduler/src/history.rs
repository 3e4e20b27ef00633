//! Bounded on-disk record of processed tasks.
//!
//! A JSON file holding the most recent [`HISTORY_CAPACITY`] entries,
//! oldest first. Persistence is best-effort: a write failure costs the
//! record its durability, never the task its result.

use std::path::PathBuf;

use fognode_core::types::{TaskStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// Maximum entries kept, in memory and on disk.
pub const HISTORY_CAPACITY: usize = 100;

/// One processed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task_id: String,
    pub timestamp: Timestamp,
    pub status: TaskStatus,
    /// Outcome summary: artifact counts for completed tasks, the
    /// failure text for failed ones.
    pub result: serde_json::Value,
}

/// Append-bounded task log, mirrored to a JSON file.
pub struct HistoryLog {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// Load existing history. A missing, unreadable, or corrupt file
    /// starts the log empty; it never blocks startup.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<HistoryEntry>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "History file corrupt, starting empty",
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "History file unreadable, starting empty",
                );
                Vec::new()
            }
        };
        Self { path, entries }
    }

    /// Append an entry, evict the oldest beyond capacity, and persist
    /// before returning.
    pub async fn record(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        if self.entries.len() > HISTORY_CAPACITY {
            let excess = self.entries.len() - HISTORY_CAPACITY;
            self.entries.drain(..excess);
        }
        self.persist().await;
    }

    /// The last `limit` entries, oldest first, optionally filtered by
    /// status. `limit == 0` means "none": callers get an empty list,
    /// never the whole log.
    pub fn list(&self, limit: usize, status: Option<TaskStatus>) -> Vec<HistoryEntry> {
        let filtered: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .filter(|entry| status.map_or(true, |wanted| entry.status == wanted))
            .collect();
        let skip = filtered.len().saturating_sub(limit);
        filtered.into_iter().skip(skip).cloned().collect()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything, in memory and on disk.
    pub async fn clear(&mut self) {
        self.entries.clear();
        self.persist().await;
    }

    // ---- private helpers ----

    async fn persist(&self) {
        let json = match serde_json::to_vec_pretty(&self.entries) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize history");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.path, json).await {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist history",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(n: usize, status: TaskStatus) -> HistoryEntry {
        HistoryEntry {
            task_id: format!("task-{n}"),
            timestamp: Utc::now(),
            status,
            result: serde_json::json!({ "n": n }),
        }
    }

    fn temp_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("history.json")
    }

    #[tokio::test]
    async fn records_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);

        let mut log = HistoryLog::load(&path).await;
        log.record(entry(1, TaskStatus::Completed)).await;
        log.record(entry(2, TaskStatus::Failed)).await;

        let reloaded = HistoryLog::load(&path).await;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.list(10, None)[0].task_id, "task-1");
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HistoryLog::load(temp_path(&dir)).await;

        for n in 0..105 {
            log.record(entry(n, TaskStatus::Completed)).await;
        }

        assert_eq!(log.len(), HISTORY_CAPACITY);
        let entries = log.list(HISTORY_CAPACITY, None);
        assert_eq!(entries.first().unwrap().task_id, "task-5");
        assert_eq!(entries.last().unwrap().task_id, "task-104");
    }

    #[tokio::test]
    async fn list_limits_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HistoryLog::load(temp_path(&dir)).await;
        log.record(entry(1, TaskStatus::Completed)).await;
        log.record(entry(2, TaskStatus::Failed)).await;
        log.record(entry(3, TaskStatus::Completed)).await;
        log.record(entry(4, TaskStatus::Failed)).await;

        let last_two = log.list(2, None);
        assert_eq!(last_two[0].task_id, "task-3");
        assert_eq!(last_two[1].task_id, "task-4");

        let failed = log.list(10, Some(TaskStatus::Failed));
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|e| e.status == TaskStatus::Failed));

        assert!(log.list(0, None).is_empty());
    }

    #[tokio::test]
    async fn clear_empties_disk_too() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);

        let mut log = HistoryLog::load(&path).await;
        log.record(entry(1, TaskStatus::Completed)).await;
        log.clear().await;

        assert!(log.is_empty());
        assert!(HistoryLog::load(&path).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        std::fs::write(&path, "{ not json").unwrap();

        assert!(HistoryLog::load(&path).await.is_empty());
    }

    #[tokio::test]
    async fn persist_failure_keeps_the_record_in_memory() {
        let mut log = HistoryLog::load("/nonexistent-dir/deeper/history.json").await;
        log.record(entry(1, TaskStatus::Completed)).await;
        assert_eq!(log.len(), 1);
    }
}
