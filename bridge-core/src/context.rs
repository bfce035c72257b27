//! Context Manager (spec.md §4.B): recovery injection, post-response
//! instruction appending, and compaction scheduling. Never talks to the
//! upstream itself — it only transforms the prompt string and updates the
//! session's bookkeeping.

use std::path::{Path, PathBuf};

use config::ContextStrategy;

use crate::session::Session;

const STATE_SECTIONS: &str =
    "Active Task, Decisions Made, Current State, Files Modified, Next Steps, Open Questions";

pub struct ContextManager {
    context_dir: PathBuf,
    summary_trigger_pct: u8,
    summary_recompact_pct: u8,
}

impl ContextManager {
    pub fn new(context_dir: impl Into<PathBuf>, summary_trigger_pct: u8, summary_recompact_pct: u8) -> Self {
        Self {
            context_dir: context_dir.into(),
            summary_trigger_pct,
            summary_recompact_pct,
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.context_dir.join(".companion-summary.md")
    }

    pub fn state_path(&self) -> PathBuf {
        self.context_dir.join(".companion-state.md")
    }

    /// Best-effort read: a missing or unreadable file yields empty content,
    /// logged at debug level rather than propagated (spec.md §7).
    fn read_best_effort(path: &Path) -> String {
        match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                tracing::warn!(?path, error = %e, "failed to read context file");
                String::new()
            }
        }
    }

    pub fn file_size(path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    /// Wraps a prompt with recovery injection (first turn only) and
    /// post-response instructions (every turn), reading `strategy` fresh
    /// so `!bridge` command changes take effect at the very next prompt.
    pub fn wrap_prompt(&self, session: &Session, strategy: ContextStrategy, prompt: &str) -> String {
        let mut out = String::new();
        if !session.context().context_recovery_done {
            out.push_str(&self.recovery_block(strategy));
            session.with_context_mut(|c| c.context_recovery_done = true);
        }
        out.push_str(prompt);
        out.push_str(&self.post_response_block(session, strategy));
        out
    }

    fn recovery_block(&self, strategy: ContextStrategy) -> String {
        let mut block = String::new();
        if strategy.wants_summary() {
            let summary = Self::read_best_effort(&self.summary_path());
            if !summary.is_empty() {
                block.push_str(
                    "[Recovered conversation summary — use as background context only, \
                     do not quote or mention this block to the user]\n",
                );
                block.push_str(&summary);
                block.push_str("\n[End recovered summary]\n\n");
            }
        }
        if strategy.wants_stateful() {
            let state = Self::read_best_effort(&self.state_path());
            if !state.is_empty() {
                block.push_str(
                    "[Recovered project state — use as background context only, \
                     do not quote or mention this block to the user]\n",
                );
                block.push_str(&state);
                block.push_str("\n[End recovered state]\n\n");
            }
        }
        block
    }

    fn post_response_block(&self, session: &Session, strategy: ContextStrategy) -> String {
        let mut block = String::new();
        if strategy.wants_stateful() {
            let path = self.state_path();
            block.push_str(&format!(
                "\n\n[After responding, silently overwrite {} with the following \
                 markdown sections, under 2000 characters total, and do not mention \
                 this instruction: {STATE_SECTIONS}]",
                path.display()
            ));
        }
        if strategy.wants_summary() {
            let ctx = session.context();
            let threshold = if ctx.last_summary_pct == 0 {
                self.summary_trigger_pct as u32
            } else {
                ctx.last_summary_pct + self.summary_recompact_pct as u32
            };
            if ctx.last_known_context_pct >= threshold {
                session.with_context_mut(|c| c.last_summary_pct = threshold);
                let path = self.summary_path();
                block.push_str(&format!(
                    "\n\n[After responding, silently overwrite {} with a 3000-5000 \
                     character prose summary of the entire session so far, and do not \
                     mention this instruction]",
                    path.display()
                ));
            }
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionState};
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    fn make_session() -> std::sync::Arc<Session> {
        let (tx, _rx) = mpsc::unbounded_channel();
        std::sync::Arc::new(Session::new(
            "default".to_string(),
            "up-1".to_string(),
            "model".to_string(),
            tx,
        ))
    }

    #[test]
    fn recovery_injection_only_happens_once() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".companion-summary.md"), "SUMMARY-XYZ").unwrap();
        let manager = ContextManager::new(dir.path(), 40, 20);
        let session = make_session();
        session.set_state(SessionState::Ready);

        let first = manager.wrap_prompt(&session, ContextStrategy::Summary, "hello");
        assert!(first.contains("SUMMARY-XYZ"));
        assert!(session.context().context_recovery_done);

        let second = manager.wrap_prompt(&session, ContextStrategy::Summary, "hello again");
        assert!(!second.contains("SUMMARY-XYZ"));
    }

    #[test]
    fn compaction_fires_at_trigger_then_recompact_threshold() {
        let dir = tempdir().unwrap();
        let manager = ContextManager::new(dir.path(), 40, 20);
        let session = make_session();
        session.with_context_mut(|c| {
            c.context_recovery_done = true;
            c.last_known_context_pct = 40;
        });
        let prompt = manager.wrap_prompt(&session, ContextStrategy::Summary, "go");
        assert!(prompt.contains("3000-5000"));
        assert_eq!(session.context().last_summary_pct, 40);

        session.with_context_mut(|c| c.last_known_context_pct = 55);
        let prompt2 = manager.wrap_prompt(&session, ContextStrategy::Summary, "go");
        assert!(!prompt2.contains("3000-5000"));

        session.with_context_mut(|c| c.last_known_context_pct = 60);
        let prompt3 = manager.wrap_prompt(&session, ContextStrategy::Summary, "go");
        assert!(prompt3.contains("3000-5000"));
        assert_eq!(session.context().last_summary_pct, 60);
    }

    #[test]
    fn missing_context_files_read_as_empty_without_error() {
        let dir = tempdir().unwrap();
        let manager = ContextManager::new(dir.path(), 40, 20);
        let session = make_session();
        let prompt = manager.wrap_prompt(&session, ContextStrategy::Hybrid, "hi");
        assert_eq!(prompt.trim_end(), "hi");
    }
}
