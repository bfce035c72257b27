//! Tool policy rule shape (spec.md §4.A), shared between config loading
//! (parses `TOOL_POLICY`) and the policy engine that evaluates it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    Deny,
    Passthrough,
}

/// `{ tool: string or "*", action: allow|deny|passthrough, input_contains?: string }`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolPolicyRule {
    pub tool: String,
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_contains: Option<String>,
}

impl ToolPolicyRule {
    pub fn new(tool: impl Into<String>, action: PolicyAction) -> Self {
        Self {
            tool: tool.into(),
            action,
            input_contains: None,
        }
    }

    pub fn with_input_contains(mut self, needle: impl Into<String>) -> Self {
        self.input_contains = Some(needle.into());
        self
    }

    /// Whether `tool` matches this rule's `tool` field: exact match
    /// (case-insensitive) or the `"*"` wildcard.
    pub fn matches_tool(&self, tool: &str) -> bool {
        self.tool == "*" || self.tool.eq_ignore_ascii_case(tool)
    }
}
