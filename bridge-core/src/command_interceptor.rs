//! Command Interceptor (spec.md §4.G): `!bridge …` prompts are answered
//! locally and never reach the upstream agent.

use config::{ContextStrategy, ContextStrategyRegister};

use crate::context::ContextManager;
use crate::session::Session;

pub struct InterceptResult {
    pub text: String,
    pub destroy_session: bool,
}

impl InterceptResult {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            destroy_session: false,
        }
    }
}

const HELP: &str = "Available commands:\n\
\u{2022} !bridge summary — use rolling-summary context recovery\n\
\u{2022} !bridge stateful — use structured-state context recovery\n\
\u{2022} !bridge hybrid — use both\n\
\u{2022} !bridge none — disable context recovery\n\
\u{2022} !bridge status — report current context state\n\
\u{2022} !bridge compact — force a summary rewrite on the next prompt\n\
\u{2022} !bridge checkpoint — force a state-file rewrite on the next prompt\n\
\u{2022} !bridge reset — destroy the current session";

/// Returns `None` when `raw_prompt` is not a `!bridge` command.
#[allow(clippy::too_many_arguments)]
pub fn intercept(
    raw_prompt: &str,
    key: &str,
    session: &Session,
    strategy: &ContextStrategyRegister,
    manager: &ContextManager,
    summary_trigger_pct: u8,
    summary_recompact_pct: u8,
) -> Option<InterceptResult> {
    let trimmed = raw_prompt.trim();
    if !trimmed.to_ascii_lowercase().starts_with("!bridge") {
        return None;
    }
    let rest = trimmed[7..].trim();
    let command = rest.split_whitespace().next().unwrap_or("").to_ascii_lowercase();

    Some(match command.as_str() {
        "summary" => {
            strategy.set(ContextStrategy::Summary);
            InterceptResult::text("Context strategy set to summary.")
        }
        "stateful" => {
            strategy.set(ContextStrategy::Stateful);
            InterceptResult::text("Context strategy set to stateful.")
        }
        "hybrid" => {
            strategy.set(ContextStrategy::Hybrid);
            InterceptResult::text("Context strategy set to hybrid.")
        }
        "none" => {
            strategy.set(ContextStrategy::None);
            InterceptResult::text("Context strategy set to none.")
        }
        "" | "status" => InterceptResult::text(status_report(
            key,
            session,
            strategy,
            manager,
            summary_trigger_pct,
            summary_recompact_pct,
        )),
        "compact" => {
            session.with_context_mut(|c| {
                c.last_summary_pct = 0;
                c.last_known_context_pct = summary_trigger_pct as u32;
            });
            InterceptResult::text("Compaction queued for the next prompt.")
        }
        "checkpoint" => {
            if matches!(strategy.get(), ContextStrategy::None | ContextStrategy::Summary) {
                strategy.set(ContextStrategy::Hybrid);
            }
            InterceptResult::text("State checkpoint queued for the next prompt.")
        }
        "reset" => InterceptResult {
            text: "Session reset. Context files were left on disk.".to_string(),
            destroy_session: true,
        },
        _ => InterceptResult::text(HELP),
    })
}

#[allow(clippy::too_many_arguments)]
fn status_report(
    key: &str,
    session: &Session,
    strategy: &ContextStrategyRegister,
    manager: &ContextManager,
    summary_trigger_pct: u8,
    summary_recompact_pct: u8,
) -> String {
    let ctx = session.context();
    let lifetime = session.lifetime();
    let next_threshold = if ctx.last_summary_pct == 0 {
        summary_trigger_pct as u32
    } else {
        ctx.last_summary_pct + summary_recompact_pct as u32
    };
    format!(
        "📊 Strategy: {}\n\
         📈 Context usage: {}%\n\
         📝 Summary file: {} bytes\n\
         📋 State file: {} bytes\n\
         🔄 Next compaction at: {}%\n\
         ⏱️ Turns this session: {}\n\
         💰 Lifetime cost: ${:.4}\n\
         🏷️ Pool key: {key}",
        strategy.get().as_str(),
        ctx.last_known_context_pct,
        ContextManager::file_size(&manager.summary_path()),
        ContextManager::file_size(&manager.state_path()),
        next_threshold,
        ctx.user_turn_count,
        lifetime.cost,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_session() -> std::sync::Arc<Session> {
        let (tx, _rx) = mpsc::unbounded_channel();
        std::sync::Arc::new(Session::new(
            "model:test".to_string(),
            "up-1".to_string(),
            "test".to_string(),
            tx,
        ))
    }

    #[test]
    fn non_command_prompt_is_not_intercepted() {
        let session = make_session();
        let strategy = ContextStrategyRegister::new(ContextStrategy::None);
        let manager = ContextManager::new(".", 40, 20);
        assert!(intercept("hello", "k", &session, &strategy, &manager, 40, 20).is_none());
    }

    #[test]
    fn status_report_includes_all_expected_icons() {
        let session = make_session();
        let strategy = ContextStrategyRegister::new(ContextStrategy::Summary);
        let manager = ContextManager::new(".", 40, 20);
        let result = intercept("!bridge status", "model:test", &session, &strategy, &manager, 40, 20).unwrap();
        for icon in ["📊", "📈", "📝", "📋", "🔄", "⏱️", "💰", "🏷️"] {
            assert!(result.text.contains(icon), "missing {icon} in {}", result.text);
        }
        assert!(!result.destroy_session);
    }

    #[test]
    fn reset_requests_session_destruction() {
        let session = make_session();
        let strategy = ContextStrategyRegister::new(ContextStrategy::None);
        let manager = ContextManager::new(".", 40, 20);
        let result = intercept("!bridge reset", "k", &session, &strategy, &manager, 40, 20).unwrap();
        assert!(result.destroy_session);
    }

    #[test]
    fn checkpoint_upgrades_none_and_summary_to_hybrid() {
        let session = make_session();
        let strategy = ContextStrategyRegister::new(ContextStrategy::Summary);
        let manager = ContextManager::new(".", 40, 20);
        intercept("!bridge checkpoint", "k", &session, &strategy, &manager, 40, 20);
        assert_eq!(strategy.get(), ContextStrategy::Hybrid);
    }

    #[test]
    fn unknown_command_returns_help() {
        let session = make_session();
        let strategy = ContextStrategyRegister::new(ContextStrategy::None);
        let manager = ContextManager::new(".", 40, 20);
        let result = intercept("!bridge frobnicate", "k", &session, &strategy, &manager, 40, 20).unwrap();
        assert!(result.text.starts_with("Available commands"));
    }
}
