//! Time-of-day gating for the processing loop.

use chrono::NaiveTime;
use fognode_core::config::ScheduleWindow;

/// Whether processing is allowed at `now`.
///
/// An empty schedule means no restriction. Otherwise at least one
/// window must contain `now`; a window that fails to parse never
/// matches.
pub fn is_allowed(now: NaiveTime, windows: &[ScheduleWindow]) -> bool {
    if windows.is_empty() {
        return true;
    }
    windows.iter().any(|window| window.contains(now))
}
