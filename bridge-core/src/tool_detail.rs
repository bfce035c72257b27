//! Tool detail formatter (spec.md §4.F): turns a (tool, input) pair into a
//! human-readable one-liner. Shared by the session's `tool_start` progress
//! event and the SSE decoration the `serve` crate renders around it.

use serde_json::Value;

fn str_field<'a>(input: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| input.get(*k).and_then(Value::as_str))
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}…")
    }
}

/// Humanizes a tool-use input into a one-liner, e.g. "Reading foo.rs" or
/// "Running: cargo test".
pub fn describe(tool_name: &str, input: &Value) -> String {
    if let Some(path) = str_field(input, &["file_path", "path", "filename"]) {
        let verb = match tool_name.to_ascii_lowercase().as_str() {
            "write" | "edit" | "multiedit" => "Writing",
            "read" => "Reading",
            "glob" => "Finding",
            _ => "Working on",
        };
        return format!("{verb} {}", basename(path));
    }
    if let Some(command) = input.get("command").and_then(Value::as_str) {
        return format!("Running: {}", truncate(command, 60));
    }
    if let Some(pattern) = str_field(input, &["pattern", "query", "regex"]) {
        return format!("Searching: {pattern}");
    }
    if let Some(description) = input.get("description").and_then(Value::as_str) {
        return truncate(description, 60);
    }
    tool_name.to_string()
}

/// A small icon table for known tools; unknown tools fall back to a wrench.
pub fn icon_for(tool_name: &str) -> &'static str {
    match tool_name.to_ascii_lowercase().as_str() {
        "read" => "📖",
        "write" => "📝",
        "edit" | "multiedit" => "✏️",
        "bash" => "💻",
        "glob" | "grep" => "🔍",
        "websearch" => "🌐",
        "task" => "🤖",
        _ => "🔧",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_path_yields_verb_and_basename() {
        let input = json!({"file_path": "/tmp/dir/main.rs"});
        assert_eq!(describe("Read", &input), "Reading main.rs");
    }

    #[test]
    fn command_is_truncated_to_60_chars() {
        let long = "x".repeat(100);
        let input = json!({"command": long});
        let detail = describe("Bash", &input);
        assert!(detail.starts_with("Running: "));
        assert!(detail.chars().count() <= "Running: ".len() + 61);
    }

    #[test]
    fn pattern_yields_searching_prefix() {
        let input = json!({"pattern": "TODO"});
        assert_eq!(describe("Grep", &input), "Searching: TODO");
    }

    #[test]
    fn unrecognized_shape_falls_back_to_tool_name() {
        let input = json!({});
        assert_eq!(describe("CustomTool", &input), "CustomTool");
    }
}
