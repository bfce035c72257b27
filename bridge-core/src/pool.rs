//! Session Pool (spec.md §4.D): keyed lookup, creation, idle timer, LRU
//! eviction, size cap. Mutated only from request handling and the idle
//! watchdog it spawns per session.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use config::Settings;

use crate::companion_client::CompanionClient;
use crate::error::{BridgeError, BridgeResult};
use crate::session::{Session, SessionResponse, SessionState};
use crate::tool_policy::PolicyEngine;

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub key: String,
    pub upstream_session_id: String,
    pub state: String,
    pub model: String,
    pub uptime_secs: u64,
    pub idle_secs: u64,
}

struct PoolInner {
    sessions: DashMap<String, Arc<Session>>,
    client: CompanionClient,
    policy: Arc<PolicyEngine>,
    settings: Arc<Settings>,
}

#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    pub fn new(settings: Arc<Settings>) -> Self {
        let client = CompanionClient::new(&settings.companion_url);
        let policy = Arc::new(PolicyEngine::new(settings.tool_policy.clone()));
        Self {
            inner: Arc::new(PoolInner {
                sessions: DashMap::new(),
                client,
                policy,
                settings,
            }),
        }
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.settings.response_timeout_ms)
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.settings.session_idle_timeout_ms)
    }

    /// Returns the session for `key`, creating and connecting a fresh one
    /// if absent or dead (spec.md §4.D).
    pub async fn get_session(&self, key: &str, model_hint: &str) -> BridgeResult<Arc<Session>> {
        if let Some(entry) = self.inner.sessions.get(key) {
            if !entry.is_dead() {
                entry.touch_activity();
                return Ok(Arc::clone(entry.value()));
            }
        }
        self.ensure_room().await;

        let upstream_id = self
            .inner
            .client
            .create_session(&self.inner.settings.permission_mode, &self.inner.settings.session_cwd)
            .await?;
        let session = self
            .inner
            .client
            .connect(&upstream_id, key.to_string(), model_hint.to_string(), Arc::clone(&self.inner.policy))
            .await?;

        let ready = session.wait_for_ready();
        self.inner.sessions.insert(key.to_string(), Arc::clone(&session));
        self.spawn_idle_watchdog(Arc::clone(&session));

        match tokio::time::timeout(self.response_timeout(), ready).await {
            Ok(Ok(Ok(()))) => Ok(session),
            Ok(Ok(Err(e))) => {
                self.destroy_session(key, "connect failed").await;
                Err(e)
            }
            Ok(Err(_)) => {
                self.destroy_session(key, "connect channel dropped").await;
                Err(BridgeError::UpstreamUnavailable("connect channel dropped".to_string()))
            }
            Err(_) => {
                self.destroy_session(key, "connect timed out").await;
                Err(BridgeError::ResponseTimeout)
            }
        }
    }

    /// Sweeps dead entries, then evicts `ready`/`dead` sessions by oldest
    /// `last_activity_at` until there is room under `MAX_SESSIONS`.
    /// `busy`/`waiting_tool_decision`/`connecting` sessions are never
    /// touched.
    async fn ensure_room(&self) {
        let dead_keys: Vec<String> = self
            .inner
            .sessions
            .iter()
            .filter(|e| e.value().is_dead())
            .map(|e| e.key().clone())
            .collect();
        for key in dead_keys {
            self.inner.sessions.remove(&key);
        }

        while self.inner.sessions.len() >= self.inner.settings.max_sessions {
            let victim = self
                .inner
                .sessions
                .iter()
                .filter(|e| matches!(e.value().state(), SessionState::Ready | SessionState::Dead))
                .min_by_key(|e| e.value().last_activity_at())
                .map(|e| e.key().clone());
            match victim {
                Some(key) => self.destroy_session(&key, "evicted to make room for a new session").await,
                None => break,
            }
        }
    }

    /// Sends a fresh prompt on an otherwise-idle session (spec.md §4.D).
    pub async fn send_prompt(&self, session: &Arc<Session>, prompt: String) -> BridgeResult<SessionResponse> {
        if session.is_dead() {
            return Err(BridgeError::SessionDead);
        }
        let rx = session.begin_request(self.response_timeout());
        session.set_state(SessionState::Busy);
        if session.send_user_message(prompt).is_err() {
            session.set_state(SessionState::Dead);
            session.reject(BridgeError::SessionDead);
        }
        rx.await.unwrap_or(Err(BridgeError::SessionDead))
    }

    /// Answers a tool call that was previously surfaced to the client.
    pub fn resolve_tool_permission(
        &self,
        session: &Session,
        tool_call_id: &str,
        approved: bool,
        message: Option<String>,
    ) -> BridgeResult<()> {
        session.resolve_tool_permission(tool_call_id, approved, message)
    }

    /// Awaits the turn resumed by [`resolve_tool_permission`]. Unlike
    /// [`send_prompt`](Self::send_prompt), this never sends a new
    /// `user_message` frame — the agent is already mid-turn and the
    /// `control_response` frame is what wakes it back up.
    pub async fn await_resumed_response(&self, session: &Arc<Session>) -> BridgeResult<SessionResponse> {
        if session.is_dead() {
            return Err(BridgeError::SessionDead);
        }
        let rx = session.begin_request(self.response_timeout());
        rx.await.unwrap_or(Err(BridgeError::SessionDead))
    }

    /// Waits for a `busy`/`waiting_tool_decision` session to settle back to
    /// `ready`, polling every 500ms (spec.md §4.E, §5). Returns the
    /// possibly-recreated session — callers must re-bind their reference
    /// (spec.md §9 open question).
    pub async fn wait_until_ready(&self, key: &str, model_hint: &str) -> BridgeResult<Arc<Session>> {
        let deadline = tokio::time::Instant::now() + self.response_timeout();
        loop {
            let current = self.inner.sessions.get(key).map(|e| Arc::clone(e.value()));
            match current {
                Some(session) if session.is_dead() => {
                    return self.get_session(key, model_hint).await;
                }
                Some(session) if !session.state().is_busy_like() => return Ok(session),
                None => return self.get_session(key, model_hint).await,
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BridgeError::ResponseTimeout);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Clears timers, drops the progress sink, removes from the map, and
    /// best-effort kills the upstream session. Always logs the reason,
    /// idle seconds, and upstream session id for post-mortem (spec.md
    /// §4.D).
    pub async fn destroy_session(&self, key: &str, reason: &str) {
        let Some((_, session)) = self.inner.sessions.remove(key) else {
            return;
        };
        session.detach_progress_sink();
        let idle_secs = session.last_activity_at().elapsed().as_secs();
        let upstream_id = session.upstream_session_id.clone();
        session.reject(BridgeError::SessionDead);
        session.set_state(SessionState::Dead);
        tracing::info!(key, reason, idle_secs, upstream_id = %upstream_id, "destroying session");
        self.inner.client.kill_session(&upstream_id).await;
    }

    pub async fn destroy_all(&self) {
        let keys: Vec<String> = self.inner.sessions.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.destroy_session(&key, "shutdown").await;
        }
    }

    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.inner
            .sessions
            .iter()
            .map(|e| {
                let s = e.value();
                SessionSnapshot {
                    key: e.key().clone(),
                    upstream_session_id: s.upstream_session_id.clone(),
                    state: format!("{:?}", s.state()),
                    model: s.model(),
                    uptime_secs: s.created_at().elapsed().as_secs(),
                    idle_secs: s.last_activity_at().elapsed().as_secs(),
                }
            })
            .collect()
    }

    fn spawn_idle_watchdog(&self, session: Arc<Session>) {
        let pool = self.clone();
        let idle_timeout = self.idle_timeout();
        tokio::spawn(async move {
            loop {
                if session.is_dead() {
                    break;
                }
                let elapsed = session.last_activity_at().elapsed();
                if elapsed < idle_timeout {
                    tokio::time::sleep(idle_timeout - elapsed).await;
                    continue;
                }
                if session.state().is_busy_like() {
                    tokio::time::sleep(idle_timeout).await;
                    continue;
                }
                pool.destroy_session(&session.key, "idle timeout").await;
                break;
            }
        });
    }
}
