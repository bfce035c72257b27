//! Wire types for the companion bridge.
//!
//! - [`companion`]: frames exchanged with the upstream Companion WebSocket server.
//! - [`openai`]: OpenAI-compatible chat-completions request/response DTOs.
//! - [`policy`]: tool policy rule shape shared by config loading and the policy engine.
//! - [`progress`]: the internal progress event fed into the SSE fan-out.

pub mod companion;
pub mod openai;
pub mod policy;
pub mod progress;

pub use companion::{
    CompanionInbound, CompanionOutbound, ControlResponseBody, ControlResponseInner,
    PermissionBehavior,
};
pub use policy::{PolicyAction, ToolPolicyRule};
pub use progress::ProgressEvent;
