//! Tool Policy Engine (spec.md §4.A): ordered rule evaluation over a tool
//! name and its JSON input.

use protocol::{PolicyAction, ToolPolicyRule};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    rules: Vec<ToolPolicyRule>,
}

impl PolicyEngine {
    pub fn new(rules: Vec<ToolPolicyRule>) -> Self {
        Self { rules }
    }

    /// Evaluates rules strictly top-to-bottom; the first match wins.
    /// A rule matches when its tool matches (`"*"` or case-insensitive
    /// equality) and, if present, `input_contains` is a substring of the
    /// input's JSON serialization. No match defaults to `allow`.
    pub fn decide(&self, tool_name: &str, input: &Value) -> PolicyAction {
        let serialized = input.to_string();
        for rule in &self.rules {
            if !rule.matches_tool(tool_name) {
                continue;
            }
            match &rule.input_contains {
                Some(needle) if !serialized.contains(needle.as_str()) => continue,
                _ => return rule.action,
            }
        }
        PolicyAction::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_matching_rule_wins() {
        let engine = PolicyEngine::new(vec![
            ToolPolicyRule::new("Bash", PolicyAction::Deny),
            ToolPolicyRule::new("*", PolicyAction::Allow),
        ]);
        assert_eq!(engine.decide("bash", &json!({})), PolicyAction::Deny);
    }

    #[test]
    fn input_contains_constraint_must_match() {
        let engine = PolicyEngine::new(vec![
            ToolPolicyRule::new("Bash", PolicyAction::Deny).with_input_contains("rm -rf"),
            ToolPolicyRule::new("*", PolicyAction::Allow),
        ]);
        assert_eq!(
            engine.decide("Bash", &json!({"command": "rm -rf /"})),
            PolicyAction::Deny
        );
        assert_eq!(
            engine.decide("Bash", &json!({"command": "ls"})),
            PolicyAction::Allow
        );
    }

    #[test]
    fn no_match_defaults_to_allow() {
        let engine = PolicyEngine::new(vec![]);
        assert_eq!(engine.decide("Anything", &json!({})), PolicyAction::Allow);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let engine = PolicyEngine::new(vec![ToolPolicyRule::new("*", PolicyAction::Passthrough)]);
        let a = engine.decide("Task", &json!({"x": 1}));
        let b = engine.decide("Task", &json!({"x": 1}));
        assert_eq!(a, b);
    }
}
