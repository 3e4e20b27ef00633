//! Typed node configuration.
//!
//! The host writes this file; the worker consumes it as a plain structured
//! record. Every field has an explicit default so a missing or partial file
//! still yields a usable configuration, and [`FogConfig::normalized`] applies
//! a deterministic repair pass (malformed schedule windows dropped, URLs
//! trimmed, zero intervals restored to defaults) before the record reaches
//! the scheduler.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// A time-of-day range during which task processing is permitted.
///
/// Bounds are `HH:MM` strings, inclusive on both ends. Windows may overlap
/// and need not be sorted; a window that does not parse never matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start: String,
    pub end: String,
}

impl ScheduleWindow {
    /// Parse both bounds. `None` if either is not a valid `HH:MM` time.
    pub fn span(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = NaiveTime::parse_from_str(&self.start, "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(&self.end, "%H:%M").ok()?;
        Some((start, end))
    }

    /// Whether `now` falls inside this window, at minute granularity.
    ///
    /// A window whose start is later than its end matches nothing; ranges
    /// do not wrap across midnight.
    pub fn contains(&self, now: NaiveTime) -> bool {
        let Some((start, end)) = self.span() else {
            return false;
        };
        // Minute granularity: 17:00:59 still counts as 17:00.
        let now = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now);
        start <= now && now <= end
    }
}

fn default_max_tasks_per_day() -> u32 {
    100
}

fn default_retry_interval() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_engine_api_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_engine_ws_url() -> String {
    "ws://127.0.0.1:8188".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_history_path() -> PathBuf {
    PathBuf::from("task_history.json")
}

/// Node configuration record.
///
/// Unknown fields in the file are ignored, so host-side additions do not
/// break the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    /// Master switch; a disabled node ticks but never fetches work.
    pub enabled: bool,

    /// Base URL of the remote task center. Empty means "not configured".
    pub task_center_url: String,

    /// Allow-windows for processing. Empty list means no restriction.
    pub schedule: Vec<ScheduleWindow>,

    /// Upper bound on tasks accepted per day. Carried for hosts that
    /// enforce it; the scheduling loop itself does not.
    pub max_tasks_per_day: u32,

    /// Seconds between scheduling ticks (how often the node re-polls
    /// for work).
    pub retry_interval: u64,

    /// Automatic transport-level retries for task-center requests.
    pub max_retries: u32,

    /// HTTP base URL of the local execution engine.
    pub engine_api_url: String,

    /// WebSocket base URL of the local execution engine's event feed.
    pub engine_ws_url: String,

    /// Directory the engine writes output artifacts into.
    pub output_dir: PathBuf,

    /// Where the bounded task history file lives.
    pub history_path: PathBuf,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            task_center_url: String::new(),
            schedule: Vec::new(),
            max_tasks_per_day: default_max_tasks_per_day(),
            retry_interval: default_retry_interval(),
            max_retries: default_max_retries(),
            engine_api_url: default_engine_api_url(),
            engine_ws_url: default_engine_ws_url(),
            output_dir: default_output_dir(),
            history_path: default_history_path(),
        }
    }
}

impl FogConfig {
    /// Apply the deterministic repair pass.
    ///
    /// Drops schedule windows that do not parse (each one logged), strips
    /// trailing slashes from URLs so path joining stays predictable, and
    /// restores a zero tick interval to its default.
    pub fn normalized(mut self) -> Self {
        self.schedule.retain(|window| {
            let ok = window.span().is_some();
            if !ok {
                tracing::warn!(
                    start = %window.start,
                    end = %window.end,
                    "Dropping malformed schedule window",
                );
            }
            ok
        });

        while self.task_center_url.ends_with('/') {
            self.task_center_url.pop();
        }
        while self.engine_api_url.ends_with('/') {
            self.engine_api_url.pop();
        }
        while self.engine_ws_url.ends_with('/') {
            self.engine_ws_url.pop();
        }

        if self.retry_interval == 0 {
            tracing::warn!("retry_interval of 0 replaced with default");
            self.retry_interval = default_retry_interval();
        }

        self
    }

    /// Cadence of the scheduling loop.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }
}
