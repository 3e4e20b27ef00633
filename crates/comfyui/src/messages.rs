//! Engine WebSocket message types and parser.
//!
//! ComfyUI pushes JSON frames shaped `{"type": "<kind>", "data": {...}}`
//! over its WebSocket. Only the kinds the node acts on are modeled;
//! everything else (execution_start, execution_cached, crystools
//! add-ons, ...) folds into [`EngineMessage::Unhandled`] so routine
//! traffic never reads as a parse failure.

use serde::Deserialize;

/// Engine WebSocket message kinds the node acts on.
///
/// Produced by [`parse_message`] from the `"type"` tag and its `"data"`
/// payload.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    /// Server-wide queue broadcast (no prompt affiliation).
    Status(StatusData),

    /// Step-level progress within a long-running node.
    Progress(ProgressData),

    /// A node started executing, or the whole prompt finished when
    /// `node` is `None`.
    Executing(ExecutingData),

    /// A node finished and produced output.
    Executed(ExecutedData),

    /// Execution of a prompt failed.
    ExecutionError(ErrorData),

    /// Any well-formed frame whose kind carries no task semantics here,
    /// whatever payload it brought along.
    Unhandled { kind: String },
}

/// Payload for `status` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: StatusInfo,
}

/// Queue section of a status broadcast.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusInfo {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: u32,
}

/// Payload for `progress` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: u32,
    /// Total number of steps.
    pub max: u32,
}

/// Payload for `executing` messages.
///
/// `node == None` means the prompt has finished executing.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Payload for `executed` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (image references, text, ...), `Null` when the
    /// node produced nothing.
    #[serde(default)]
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    pub exception_type: String,
}

/// Undispatched frame: the kind tag plus its raw payload.
///
/// The kind is inspected before any payload struct is chosen, so a
/// frame of an unknown kind is never held to a payload shape.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse an engine WebSocket text frame into a typed message.
///
/// Returns `Err` only for malformed JSON, a frame without a `type` tag,
/// or a known kind whose payload does not match; unknown kinds parse as
/// [`EngineMessage::Unhandled`] regardless of their payload.
pub fn parse_message(text: &str) -> Result<EngineMessage, serde_json::Error> {
    let frame: RawFrame = serde_json::from_str(text)?;
    let msg = match frame.kind.as_str() {
        "status" => EngineMessage::Status(serde_json::from_value(frame.data)?),
        "progress" => EngineMessage::Progress(serde_json::from_value(frame.data)?),
        "executing" => EngineMessage::Executing(serde_json::from_value(frame.data)?),
        "executed" => EngineMessage::Executed(serde_json::from_value(frame.data)?),
        "execution_error" => EngineMessage::ExecutionError(serde_json::from_value(frame.data)?),
        _ => EngineMessage::Unhandled { kind: frame.kind },
    };
    Ok(msg)
}
