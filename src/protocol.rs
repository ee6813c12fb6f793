use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `result.action` value that asks the caller to open the booking flow.
pub const HANDOFF_ACTION: &str = "open_booking_wizard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub thread_id: String,
    pub history: Vec<HistoryEntry>,
}

/// Body of a non-success response returned before streaming starts.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

/// One decoded unit of the inbound event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token { content: String },
    ToolCall { tool: String },
    ToolResult { tool: String, result: Value },
    Error { message: Option<String> },
    Done,
    Unknown { event: String },
}

#[derive(Deserialize)]
struct TokenPayload {
    content: String,
}

#[derive(Deserialize)]
struct ToolCallPayload {
    tool: String,
}

#[derive(Deserialize)]
struct ToolResultPayload {
    tool: String,
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

impl StreamEvent {
    /// Interprets a decoded frame. Known event types whose payload has the
    /// wrong shape are rejected; unknown event types are kept as `Unknown`.
    pub fn from_frame(event: &str, data: Value) -> Result<Self, serde_json::Error> {
        let parsed = match event {
            "token" => {
                let payload: TokenPayload = serde_json::from_value(data)?;
                StreamEvent::Token {
                    content: payload.content,
                }
            }
            "tool_call" => {
                let payload: ToolCallPayload = serde_json::from_value(data)?;
                StreamEvent::ToolCall { tool: payload.tool }
            }
            "tool_result" => {
                let payload: ToolResultPayload = serde_json::from_value(data)?;
                StreamEvent::ToolResult {
                    tool: payload.tool,
                    result: payload.result,
                }
            }
            "error" => {
                let payload: ErrorPayload = serde_json::from_value(data)?;
                StreamEvent::Error {
                    message: payload.message.filter(|m| !m.trim().is_empty()),
                }
            }
            "done" => StreamEvent::Done,
            other => StreamEvent::Unknown {
                event: other.to_string(),
            },
        };
        Ok(parsed)
    }

    pub fn name(&self) -> &str {
        match self {
            StreamEvent::Token { .. } => "token",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
            StreamEvent::Unknown { event } => event,
        }
    }
}

/// Returns true when a tool result carries the booking-flow handoff marker.
pub fn is_handoff(result: &Value) -> bool {
    result.get("action").and_then(Value::as_str) == Some(HANDOFF_ACTION)
}
