//! Task-facing events derived from raw engine messages.
//!
//! The event channel parses every frame, but the orchestrator only ever
//! sees [`ResultEvent`]s: per-node outputs, the completion marker, or a
//! failure report, all scoped to the one workflow being tracked.

use crate::messages::EngineMessage;

/// An event about the workflow currently in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEvent {
    /// A node finished and produced output.
    NodeOutput {
        node_id: String,
        output: serde_json::Value,
    },
    /// Every node of the workflow has executed.
    Completed,
    /// The engine reported an execution failure.
    Error { message: String },
}

/// Translate a wire message into a [`ResultEvent`], given the handle of
/// the workflow being tracked.
///
/// Returns `None` for messages that belong to a different prompt or
/// that carry no result semantics (status broadcasts, progress ticks,
/// per-node start notifications).
pub fn map_message(msg: &EngineMessage, tracked: &str) -> Option<ResultEvent> {
    match msg {
        EngineMessage::Executing(data) if data.prompt_id == tracked => {
            // node == None is the engine's end-of-prompt marker.
            match data.node {
                None => Some(ResultEvent::Completed),
                Some(_) => None,
            }
        }
        EngineMessage::Executed(data) if data.prompt_id == tracked => {
            Some(ResultEvent::NodeOutput {
                node_id: data.node.clone(),
                output: data.output.clone(),
            })
        }
        EngineMessage::ExecutionError(data) if data.prompt_id == tracked => {
            Some(ResultEvent::Error {
                message: data.exception_message.clone(),
            })
        }
        _ => None,
    }
}
