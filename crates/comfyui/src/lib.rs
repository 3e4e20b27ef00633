//! Local engine bridge for ComfyUI.
//!
//! Provides the REST surface used to submit workflows and query queue
//! occupancy, typed parsing of the engine's WebSocket frames, and a
//! persistent event channel that filters those frames down to the
//! events belonging to the workflow currently in flight.

pub mod api;
pub mod channel;
pub mod events;
pub mod gateway;
pub mod messages;
pub mod reconnect;
