//! Scheduling core for the node.
//!
//! Houses the schedule gate, the result aggregator that waits out a
//! running workflow, artifact collection, the bounded task history,
//! post-failure recovery, and the orchestrating tick loop.

pub mod aggregator;
pub mod artifacts;
pub mod gate;
pub mod history;
pub mod recovery;
pub mod scheduler;
