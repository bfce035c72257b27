//! Tool policy list loading (spec.md §4.A): the default rule list, and
//! parsing an operator-supplied `TOOL_POLICY` override with a safe fallback.

use protocol::{PolicyAction, ToolPolicyRule};

/// `Read, Glob, Grep, WebSearch, Task` → allow; catch-all → allow (auto) or
/// passthrough (passthrough), chosen by the caller via `catch_all`.
pub fn default_tool_policy(catch_all: PolicyAction) -> Vec<ToolPolicyRule> {
    vec![
        ToolPolicyRule::new("Read", PolicyAction::Allow),
        ToolPolicyRule::new("Glob", PolicyAction::Allow),
        ToolPolicyRule::new("Grep", PolicyAction::Allow),
        ToolPolicyRule::new("WebSearch", PolicyAction::Allow),
        ToolPolicyRule::new("Task", PolicyAction::Allow),
        ToolPolicyRule::new("*", catch_all),
    ]
}

/// Parses `TOOL_POLICY` (a JSON array of [`ToolPolicyRule`]). A missing
/// value returns the default list for `catch_all`; a malformed value logs a
/// warning and also falls back to the default list (spec.md §4.A, §7).
pub fn load_tool_policy(raw: Option<&str>, catch_all: PolicyAction) -> Vec<ToolPolicyRule> {
    let Some(raw) = raw else {
        return default_tool_policy(catch_all);
    };
    match serde_json::from_str::<Vec<ToolPolicyRule>>(raw) {
        Ok(rules) if !rules.is_empty() => rules,
        Ok(_) => {
            tracing::warn!("TOOL_POLICY parsed to an empty list; falling back to defaults");
            default_tool_policy(catch_all)
        }
        Err(e) => {
            tracing::warn!("TOOL_POLICY is malformed ({e}); falling back to defaults");
            default_tool_policy(catch_all)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_list_ends_with_catch_all() {
        let rules = default_tool_policy(PolicyAction::Allow);
        assert_eq!(rules.last().unwrap().tool, "*");
        assert_eq!(rules.len(), 6);
    }

    #[test]
    fn malformed_override_falls_back_to_defaults() {
        let rules = load_tool_policy(Some("not json"), PolicyAction::Passthrough);
        assert_eq!(rules.last().unwrap().action, PolicyAction::Passthrough);
    }

    #[test]
    fn valid_override_replaces_defaults() {
        let raw = r#"[{"tool":"Bash","action":"deny"}]"#;
        let rules = load_tool_policy(Some(raw), PolicyAction::Allow);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].tool, "Bash");
    }

    #[test]
    fn missing_override_uses_defaults() {
        let rules = load_tool_policy(None, PolicyAction::Allow);
        assert_eq!(rules.len(), 6);
    }
}
