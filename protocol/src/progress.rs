//! Progress events: the stream a session emits while a request is in
//! flight, consumed by the SSE fan-out (spec.md §3, §4.F) or discarded
//! when no progress sink is attached.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    TextDelta { text: String },
    ToolStart { tool: String, detail: String },
    ToolResult { tool: String, success: bool },
    Thinking { status: String },
    Turn { turn: u64 },
}
