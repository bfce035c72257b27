//! Environment configuration for the companion bridge (spec.md §6).
//!
//! [`Settings`] is read once at startup and handed around as an
//! `Arc<Settings>`. The one exception is [`ContextStrategyRegister`]: the
//! active context strategy is process-wide mutable state that `!bridge`
//! commands flip at runtime (spec.md §9, "Global mutable state").

mod context_strategy;
mod settings;
mod tool_policy;

pub use context_strategy::{ContextStrategy, ContextStrategyRegister};
pub use settings::Settings;
pub use tool_policy::{default_tool_policy, load_tool_policy};
