//! Shared types for the fognode worker.
//!
//! Defines the task-center data model ([`types::Task`], result statuses),
//! the engine execution handle, and the typed node configuration with
//! its validation/repair pass.

pub mod config;
pub mod types;
