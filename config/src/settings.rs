//! Adapter-wide settings loaded once from the environment (spec.md §6).

use std::env;

use protocol::PolicyAction;

use crate::context_strategy::ContextStrategy;
use crate::tool_policy::load_tool_policy;
use protocol::ToolPolicyRule;

#[derive(Debug, Clone)]
pub struct Settings {
    pub companion_url: String,
    pub adapter_port: u16,
    pub session_cwd: String,
    pub permission_mode: String,
    pub model_name: String,
    pub tool_mode: String,
    pub tool_policy: Vec<ToolPolicyRule>,
    pub log_format: String,
    pub response_timeout_ms: u64,
    pub session_idle_timeout_ms: u64,
    pub max_sessions: usize,
    pub context_strategy: ContextStrategy,
    pub summary_trigger_pct: u8,
    pub summary_recompact_pct: u8,
    pub context_dir: String,
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Reads every variable in spec.md §6. Unstated values fall back to
    /// defaults documented in DESIGN.md rather than failing startup;
    /// malformed `TOOL_MODE` / `CONTEXT_STRATEGY` fall back with a warning.
    pub fn from_env() -> Self {
        let tool_mode = match env_string("TOOL_MODE", "auto").to_ascii_lowercase().as_str() {
            "auto" => "auto".to_string(),
            "passthrough" => "passthrough".to_string(),
            other => {
                tracing::warn!("TOOL_MODE={other:?} is not recognized; defaulting to auto");
                "auto".to_string()
            }
        };
        let catch_all = if tool_mode == "passthrough" {
            PolicyAction::Passthrough
        } else {
            PolicyAction::Allow
        };
        let tool_policy = load_tool_policy(env::var("TOOL_POLICY").ok().as_deref(), catch_all);

        let context_strategy = env::var("CONTEXT_STRATEGY")
            .ok()
            .and_then(|v| v.parse::<ContextStrategy>().ok())
            .unwrap_or_else(|| {
                if let Ok(raw) = env::var("CONTEXT_STRATEGY") {
                    tracing::warn!(
                        "CONTEXT_STRATEGY={raw:?} is not recognized; defaulting to summary"
                    );
                }
                ContextStrategy::Summary
            });

        Settings {
            companion_url: env_string("COMPANION_URL", "ws://127.0.0.1:4000"),
            adapter_port: env_parsed("ADAPTER_PORT", 8089u16),
            session_cwd: env_string("SESSION_CWD", "."),
            permission_mode: env_string("PERMISSION_MODE", "default"),
            model_name: env_string("MODEL_NAME", "claude-code-companion"),
            tool_mode,
            tool_policy,
            log_format: env_string("LOG_FORMAT", "pretty"),
            response_timeout_ms: env_parsed("RESPONSE_TIMEOUT_MS", 1_800_000u64),
            session_idle_timeout_ms: env_parsed("SESSION_IDLE_TIMEOUT_MS", 1_800_000u64),
            max_sessions: env_parsed("MAX_SESSIONS", 10usize),
            context_strategy,
            summary_trigger_pct: env_parsed("SUMMARY_TRIGGER_PCT", 40u8),
            summary_recompact_pct: env_parsed("SUMMARY_RECOMPACT_PCT", 20u8),
            context_dir: env_string("CONTEXT_DIR", "."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in [
            "COMPANION_URL",
            "ADAPTER_PORT",
            "TOOL_MODE",
            "CONTEXT_STRATEGY",
            "TOOL_POLICY",
        ] {
            env::remove_var(key);
        }
        let settings = Settings::from_env();
        assert_eq!(settings.adapter_port, 8089);
        assert_eq!(settings.tool_mode, "auto");
        assert_eq!(settings.context_strategy, ContextStrategy::Summary);
        assert_eq!(settings.response_timeout_ms, 1_800_000);
    }

    #[test]
    fn invalid_tool_mode_falls_back_to_auto() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("TOOL_MODE", "bogus");
        let settings = Settings::from_env();
        assert_eq!(settings.tool_mode, "auto");
        env::remove_var("TOOL_MODE");
    }
}
