//! Frames exchanged with the upstream Companion WebSocket server.
//!
//! The Companion shape is immutable from our side (spec.md §4.C): we only
//! parse what we need from each inbound frame and construct the three
//! outbound frames the session ever sends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content block inside an `assistant` message.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Token usage as reported inline on an `assistant` frame or a `result` frame.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UsageInfo {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionInitPayload {
    pub session: SessionInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: UsageInfo,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantPayload {
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    pub message: AssistantMessage,
}

/// A `content_block_start` descriptor: `thinking | text | tool_use`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStart {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The nested `event` object of a `stream_event` frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventInner {
    ContentBlockStart { content_block: ContentBlockStart },
    MessageStart,
    ContentBlockDelta { delta: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamEventPayload {
    pub event: StreamEventInner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRequestPayload {
    pub request_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolResultPayload {
    pub tool_name: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResultData {
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub num_turns: u64,
    #[serde(default)]
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultPayload {
    pub data: ResultData,
}

/// Frames received from the Companion over the WebSocket, tagged by `type`.
///
/// `Ping`/`Pong`/`Heartbeat` are recognized but carry no data; any other
/// unrecognized tag falls into `Unknown` and is logged at info level by the
/// session (spec.md §4.C).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompanionInbound {
    SessionInit(SessionInitPayload),
    CliConnected,
    Assistant(AssistantPayload),
    StreamEvent(StreamEventPayload),
    PermissionRequest(PermissionRequestPayload),
    ToolResult(ToolResultPayload),
    Result(ResultPayload),
    CliDisconnected,
    Ping,
    Pong,
    Heartbeat,
    #[serde(other)]
    Unknown,
}

/// `allow` / `deny` as sent back to the Companion for a tool-use decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionBehavior {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlResponseInner {
    pub behavior: PermissionBehavior,
    #[serde(rename = "updatedInput", skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlResponseBody {
    pub subtype: &'static str,
    pub request_id: String,
    pub response: ControlResponseInner,
}

/// Frames we send to the Companion.
///
/// `PermissionResponse` answers a `permission_request` directly (tool policy
/// decided allow/deny without surfacing it to the client). `ControlResponse`
/// answers one that was passed through to the client and came back as a
/// tool-result message (spec.md §4.D `resolve_tool_permission`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompanionOutbound {
    UserMessage {
        content: String,
    },
    PermissionResponse {
        request_id: String,
        behavior: PermissionBehavior,
        #[serde(skip_serializing_if = "Option::is_none")]
        updated_input: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ControlResponse {
        response: ControlResponseBody,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_connected_round_trip() {
        let v: CompanionInbound = serde_json::from_str(r#"{"type":"cli_connected"}"#).unwrap();
        assert!(matches!(v, CompanionInbound::CliConnected));
    }

    #[test]
    fn assistant_frame_with_sub_agent_parent_parses() {
        let json = serde_json::json!({
            "type": "assistant",
            "parent_tool_use_id": "tu_1",
            "message": {
                "content": [{"type": "text", "text": "hi"}],
                "usage": {"input_tokens": 10, "output_tokens": 3},
            }
        });
        let v: CompanionInbound = serde_json::from_value(json).unwrap();
        match v {
            CompanionInbound::Assistant(p) => {
                assert_eq!(p.parent_tool_use_id.as_deref(), Some("tu_1"));
                assert_eq!(p.message.usage.input_tokens, 10);
            }
            _ => panic!("expected assistant"),
        }
    }

    #[test]
    fn unknown_type_falls_back_to_unknown_variant() {
        let v: CompanionInbound = serde_json::from_str(r#"{"type":"something_new"}"#).unwrap();
        assert!(matches!(v, CompanionInbound::Unknown));
    }

    #[test]
    fn permission_response_serializes_snake_case_updated_input() {
        let frame = CompanionOutbound::PermissionResponse {
            request_id: "r1".into(),
            behavior: PermissionBehavior::Allow,
            updated_input: Some(serde_json::json!({"path": "a.txt"})),
            message: None,
        };
        let s = serde_json::to_string(&frame).unwrap();
        assert!(s.contains("\"type\":\"permission_response\""));
        assert!(s.contains("\"updated_input\""));
    }

    #[test]
    fn control_response_serializes_camel_case_updated_input() {
        let frame = CompanionOutbound::ControlResponse {
            response: ControlResponseBody {
                subtype: "success",
                request_id: "r1".into(),
                response: ControlResponseInner {
                    behavior: PermissionBehavior::Allow,
                    updated_input: Some(serde_json::json!({})),
                    message: None,
                },
            },
        };
        let s = serde_json::to_string(&frame).unwrap();
        assert!(s.contains("\"updatedInput\""));
        assert!(s.contains("\"subtype\":\"success\""));
    }
}
