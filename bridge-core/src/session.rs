//! One upstream conversation: state machine, accumulators, pending work
//! (spec.md §3, §4.C). The session exclusively owns its upstream connection;
//! callers only ever see it through [`Session`]'s operations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use protocol::ProgressEvent;

use crate::error::{BridgeError, BridgeResult};

/// The 200,000-token context budget is hard-coded per spec.md §9's open
/// question resolution: an implementation may expose it but must keep this
/// default, so it stays a crate constant rather than a config field.
pub const CONTEXT_TOKEN_BUDGET: u64 = 200_000;

/// Context-percentage thresholds that fire a one-time warning event.
pub const CONTEXT_WARNING_THRESHOLDS: [u32; 4] = [50, 70, 85, 95];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Busy,
    WaitingToolDecision,
    Dead,
}

impl SessionState {
    pub fn is_busy_like(self) -> bool {
        matches!(self, SessionState::Busy | SessionState::WaitingToolDecision)
    }
}

/// An upstream tool-use request that was handed to the client instead of
/// being auto-decided (spec.md §4.C passthrough branch).
#[derive(Debug, Clone)]
pub struct PendingPermission {
    pub upstream_request_id: String,
    pub tool_name: String,
    pub input: Value,
    pub tool_call_id: String,
}

/// Per-request accumulators, reset at the start of every prompt.
#[derive(Debug, Default)]
struct Accumulators {
    text: String,
    input_tokens: u64,
    output_tokens: u64,
    cost: f64,
    turns: u64,
    any_assistant_text: bool,
    usage_from_message: bool,
}

/// Lifetime counters, monotone until the session is destroyed.
#[derive(Debug, Default, Clone, Copy)]
pub struct LifetimeCounters {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub turns: u64,
    pub cost: f64,
}

/// Context-recovery and compaction bookkeeping (spec.md §4.B).
#[derive(Debug, Clone, Copy)]
pub struct ContextTracking {
    pub last_known_context_pct: u32,
    pub last_summary_pct: u32,
    pub last_warning_pct: u32,
    pub context_recovery_done: bool,
    pub user_turn_count: u64,
    pub is_synthetic_turn: bool,
}

impl Default for ContextTracking {
    fn default() -> Self {
        Self {
            last_known_context_pct: 0,
            last_summary_pct: 0,
            last_warning_pct: 0,
            context_recovery_done: false,
            user_turn_count: 0,
            is_synthetic_turn: false,
        }
    }
}

/// What a resolved request hands back to the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct SessionResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub turns: u64,
    pub pending_tool_calls: Vec<PendingPermission>,
}

type Resolver = oneshot::Sender<BridgeResult<SessionResponse>>;

/// One logical upstream conversation: one WebSocket, one agent instance.
pub struct Session {
    pub key: String,
    pub upstream_session_id: String,
    outbound_tx: mpsc::UnboundedSender<Message>,
    state: Mutex<SessionState>,
    model: Mutex<String>,
    created_at: Instant,
    last_activity_at: Mutex<Instant>,
    accum: Mutex<Accumulators>,
    lifetime: Mutex<LifetimeCounters>,
    context: Mutex<ContextTracking>,
    resolver: Mutex<Option<Resolver>>,
    pending_permissions: Mutex<HashMap<String, PendingPermission>>,
    progress_sink: Mutex<Option<mpsc::UnboundedSender<ProgressEvent>>>,
    timeout_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    connect_notify: Mutex<Option<oneshot::Sender<BridgeResult<()>>>>,
}

impl Session {
    pub fn new(
        key: String,
        upstream_session_id: String,
        model: String,
        outbound_tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            key,
            upstream_session_id,
            outbound_tx,
            state: Mutex::new(SessionState::Connecting),
            model: Mutex::new(model),
            created_at: Instant::now(),
            last_activity_at: Mutex::new(Instant::now()),
            accum: Mutex::new(Accumulators::default()),
            lifetime: Mutex::new(LifetimeCounters::default()),
            context: Mutex::new(ContextTracking::default()),
            resolver: Mutex::new(None),
            pending_permissions: Mutex::new(HashMap::new()),
            progress_sink: Mutex::new(None),
            timeout_handle: Mutex::new(None),
            connect_notify: Mutex::new(None),
        }
    }

    /// Registers the waiter for `connecting → ready`. Resolves when
    /// `cli_connected` arrives, rejects on socket error (spec.md §4.D).
    pub fn wait_for_ready(&self) -> oneshot::Receiver<BridgeResult<()>> {
        let (tx, rx) = oneshot::channel();
        *self.connect_notify.lock().expect("connect_notify lock poisoned") = Some(tx);
        rx
    }

    fn notify_connect(&self, result: BridgeResult<()>) {
        if let Some(tx) = self
            .connect_notify
            .lock()
            .expect("connect_notify lock poisoned")
            .take()
        {
            let _ = tx.send(result);
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state lock poisoned")
    }

    pub fn set_state(&self, s: SessionState) {
        *self.state.lock().expect("session state lock poisoned") = s;
    }

    pub fn model(&self) -> String {
        self.model.lock().expect("model lock poisoned").clone()
    }

    pub fn set_model(&self, model: String) {
        *self.model.lock().expect("model lock poisoned") = model;
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity_at(&self) -> Instant {
        *self
            .last_activity_at
            .lock()
            .expect("last_activity lock poisoned")
    }

    pub fn touch_activity(&self) {
        *self
            .last_activity_at
            .lock()
            .expect("last_activity lock poisoned") = Instant::now();
    }

    pub fn lifetime(&self) -> LifetimeCounters {
        *self.lifetime.lock().expect("lifetime lock poisoned")
    }

    pub fn context(&self) -> ContextTracking {
        *self.context.lock().expect("context lock poisoned")
    }

    pub fn with_context_mut<R>(&self, f: impl FnOnce(&mut ContextTracking) -> R) -> R {
        let mut guard = self.context.lock().expect("context lock poisoned");
        f(&mut guard)
    }

    pub fn is_dead(&self) -> bool {
        self.state() == SessionState::Dead
    }

    /// Transitions to `dead` on upstream socket closure (spec.md §4.C).
    /// Rejects an in-flight request only if one was outstanding; rejects a
    /// pending connect if the socket closed before `cli_connected` arrived.
    pub fn handle_socket_closed(&self) {
        let was_busy = self.state().is_busy_like();
        let was_connecting = self.state() == SessionState::Connecting;
        self.set_state(SessionState::Dead);
        if was_busy {
            self.reject(BridgeError::UpstreamUnavailable(
                "companion websocket closed".to_string(),
            ));
        } else if was_connecting {
            self.notify_connect(Err(BridgeError::UpstreamUnavailable(
                "companion websocket closed before cli_connected".to_string(),
            )));
        } else {
            tracing::info!(key = %self.key, "companion websocket closed while idle");
        }
    }

    /// Sends a raw frame over the owned WebSocket. The only path by which
    /// anything outside this module touches the socket.
    fn send_frame(&self, frame: &protocol::CompanionOutbound) -> BridgeResult<()> {
        let json = serde_json::to_string(frame)?;
        self.outbound_tx
            .send(Message::Text(json))
            .map_err(|_| BridgeError::SessionDead)
    }

    /// Resets per-request accumulators and arms the response timeout.
    /// Returns a receiver that completes exactly once, from
    /// [`resolve`](Session::resolve), [`reject`](Session::reject), or the
    /// timeout task spawned here.
    pub fn begin_request(
        self: &std::sync::Arc<Self>,
        timeout: Duration,
    ) -> oneshot::Receiver<BridgeResult<SessionResponse>> {
        *self.accum.lock().expect("accum lock poisoned") = Accumulators::default();
        let (tx, rx) = oneshot::channel();
        *self.resolver.lock().expect("resolver lock poisoned") = Some(tx);

        let session = std::sync::Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            session.reject(BridgeError::ResponseTimeout);
            if session.state().is_busy_like() {
                session.set_state(SessionState::Ready);
            }
        });
        if let Some(old) = self
            .timeout_handle
            .lock()
            .expect("timeout lock poisoned")
            .replace(handle)
        {
            old.abort();
        }
        rx
    }

    fn clear_timeout(&self) {
        if let Some(h) = self
            .timeout_handle
            .lock()
            .expect("timeout lock poisoned")
            .take()
        {
            h.abort();
        }
    }

    /// Resolves the in-flight request exactly once; a second call is a
    /// silent no-op (the resolver is already gone).
    fn resolve(&self, response: SessionResponse) {
        self.clear_timeout();
        if let Some(tx) = self.resolver.lock().expect("resolver lock poisoned").take() {
            let _ = tx.send(Ok(response));
        }
    }

    pub fn reject(&self, err: BridgeError) {
        self.clear_timeout();
        if let Some(tx) = self.resolver.lock().expect("resolver lock poisoned").take() {
            let _ = tx.send(Err(err));
        }
    }

    pub fn attach_progress_sink(&self, sink: mpsc::UnboundedSender<ProgressEvent>) {
        *self.progress_sink.lock().expect("sink lock poisoned") = Some(sink);
    }

    pub fn detach_progress_sink(&self) {
        *self.progress_sink.lock().expect("sink lock poisoned") = None;
    }

    fn emit_progress(&self, event: ProgressEvent) {
        let guard = self.progress_sink.lock().expect("sink lock poisoned");
        if let Some(sink) = guard.as_ref() {
            let _ = sink.send(event);
        }
    }

    pub fn send_user_message(&self, content: String) -> BridgeResult<()> {
        self.send_frame(&protocol::CompanionOutbound::UserMessage { content })
    }

    /// Answers a pending permission directly (policy decided without
    /// surfacing it to the client).
    fn send_permission_response(
        &self,
        request_id: String,
        behavior: protocol::PermissionBehavior,
        updated_input: Option<Value>,
    ) -> BridgeResult<()> {
        self.send_frame(&protocol::CompanionOutbound::PermissionResponse {
            request_id,
            behavior,
            updated_input,
            message: None,
        })
    }

    /// Answers a permission that was passed through to the client and came
    /// back as a tool result (spec.md §4.D `resolve_tool_permission`).
    pub fn resolve_tool_permission(
        &self,
        tool_call_id: &str,
        approved: bool,
        message: Option<String>,
    ) -> BridgeResult<()> {
        let pending = self
            .pending_permissions
            .lock()
            .expect("pending permissions lock poisoned")
            .remove(tool_call_id);
        let Some(pending) = pending else {
            return Err(BridgeError::InvalidRequest(format!(
                "no pending permission for tool_call_id {tool_call_id}"
            )));
        };
        let behavior = if approved {
            protocol::PermissionBehavior::Allow
        } else {
            protocol::PermissionBehavior::Deny
        };
        let response = protocol::ControlResponseInner {
            behavior,
            updated_input: approved.then(|| pending.input.clone()),
            message: if approved { None } else { message },
        };
        let frame = protocol::CompanionOutbound::ControlResponse {
            response: protocol::ControlResponseBody {
                subtype: "success",
                request_id: pending.upstream_request_id,
                response,
            },
        };
        self.send_frame(&frame)?;
        self.set_state(SessionState::Busy);
        Ok(())
    }

    /// Processes one inbound Companion frame (spec.md §4.C). Returns the
    /// list of pending tool calls if this frame resolved the in-flight
    /// request via passthrough, so the pool can report them back to the
    /// dispatcher without re-deriving state.
    pub fn handle_inbound(&self, frame: protocol::CompanionInbound, decide_tool: impl Fn(&str, &Value) -> protocol::PolicyAction) {
        use protocol::CompanionInbound as In;
        match frame {
            In::SessionInit(p) => {
                self.set_model(p.session.model);
            }
            In::CliConnected => {
                self.set_state(SessionState::Ready);
                self.notify_connect(Ok(()));
            }
            In::Assistant(p) => {
                if p.parent_tool_use_id.is_some() {
                    return;
                }
                self.touch_activity();
                let mut text_delta = String::new();
                {
                    let mut accum = self.accum.lock().expect("accum lock poisoned");
                    for block in &p.message.content {
                        if block.block_type == "text" {
                            if let Some(t) = &block.text {
                                accum.text.push_str(t);
                                text_delta.push_str(t);
                            }
                        }
                    }
                    accum.input_tokens += p.message.usage.input_tokens;
                    accum.output_tokens += p.message.usage.output_tokens;
                    accum.turns += 1;
                    accum.any_assistant_text = accum.any_assistant_text || !accum.text.is_empty();
                    accum.usage_from_message = true;
                }
                if !text_delta.is_empty() {
                    self.emit_progress(ProgressEvent::TextDelta { text: text_delta });
                }
            }
            In::StreamEvent(p) => self.handle_stream_event(p.event),
            In::PermissionRequest(p) => self.handle_permission_request(p, decide_tool),
            In::ToolResult(p) => {
                self.emit_progress(ProgressEvent::ToolResult {
                    tool: p.tool_name,
                    success: !p.is_error,
                });
            }
            In::Result(p) => self.finalize_result(p.data),
            In::CliDisconnected => {
                if self.state().is_busy_like() {
                    self.reject(BridgeError::UpstreamUnavailable(
                        "cli_disconnected while busy".to_string(),
                    ));
                    self.set_state(SessionState::Dead);
                } else {
                    tracing::info!(key = %self.key, "cli_disconnected while idle");
                }
            }
            In::Ping | In::Pong | In::Heartbeat => {}
            In::Unknown => {
                tracing::info!(key = %self.key, "unknown companion frame type");
            }
        }
    }

    fn handle_stream_event(&self, event: protocol::companion::StreamEventInner) {
        use protocol::companion::StreamEventInner as E;
        match event {
            E::ContentBlockStart { content_block } => {
                let status = match content_block.block_type.as_str() {
                    "thinking" => "Thinking".to_string(),
                    "tool_use" => content_block
                        .name
                        .map(|n| format!("Using {n}"))
                        .unwrap_or_else(|| "Using a tool".to_string()),
                    _ => "Processing".to_string(),
                };
                self.emit_progress(ProgressEvent::Thinking { status });
            }
            E::MessageStart => {
                self.emit_progress(ProgressEvent::Thinking {
                    status: "Processing…".to_string(),
                });
            }
            E::ContentBlockDelta { delta } => {
                tracing::debug!(key = %self.key, ?delta, "thinking delta");
            }
            E::Other => {}
        }
    }

    fn handle_permission_request(
        &self,
        p: protocol::companion::PermissionRequestPayload,
        decide_tool: impl Fn(&str, &Value) -> protocol::PolicyAction,
    ) {
        self.emit_progress(ProgressEvent::ToolStart {
            tool: p.tool_name.clone(),
            detail: crate::tool_detail::describe(&p.tool_name, &p.input),
        });
        match decide_tool(&p.tool_name, &p.input) {
            protocol::PolicyAction::Allow => {
                let _ = self.send_permission_response(
                    p.request_id,
                    protocol::PermissionBehavior::Allow,
                    Some(p.input),
                );
            }
            protocol::PolicyAction::Deny => {
                let _ = self.send_permission_response(
                    p.request_id,
                    protocol::PermissionBehavior::Deny,
                    None,
                );
            }
            protocol::PolicyAction::Passthrough => {
                let tool_call_id = synthesize_tool_call_id();
                let pending = PendingPermission {
                    upstream_request_id: p.request_id,
                    tool_name: p.tool_name,
                    input: p.input,
                    tool_call_id: tool_call_id.clone(),
                };
                self.pending_permissions
                    .lock()
                    .expect("pending permissions lock poisoned")
                    .insert(tool_call_id, pending.clone());
                self.set_state(SessionState::WaitingToolDecision);
                let accum = self.accum.lock().expect("accum lock poisoned");
                let response = SessionResponse {
                    text: accum.text.clone(),
                    model: self.model(),
                    input_tokens: accum.input_tokens,
                    output_tokens: accum.output_tokens,
                    cost: accum.cost,
                    turns: accum.turns,
                    pending_tool_calls: vec![pending],
                };
                drop(accum);
                self.resolve(response);
            }
        }
    }

    fn finalize_result(&self, data: protocol::companion::ResultData) {
        let mut accum = self.accum.lock().expect("accum lock poisoned");
        if !accum.usage_from_message {
            if let Some(usage) = &data.usage {
                accum.input_tokens += usage.input_tokens;
                accum.output_tokens += usage.output_tokens;
            }
        }
        if data.is_error && !data.errors.is_empty() && accum.text.is_empty() {
            accum.text = data.errors.join("\n");
        } else if accum.text.is_empty() {
            if let Some(result) = &data.result {
                accum.text = result.clone();
            }
        }
        accum.cost += data.total_cost_usd;
        accum.turns = accum.turns.max(data.num_turns);

        let current_input = accum.input_tokens;

        let mut lifetime = self.lifetime.lock().expect("lifetime lock poisoned");
        lifetime.input_tokens += accum.input_tokens;
        lifetime.output_tokens += accum.output_tokens;
        lifetime.turns += accum.turns;
        lifetime.cost += accum.cost;
        drop(lifetime);

        let pct = ((current_input as f64 / CONTEXT_TOKEN_BUDGET as f64) * 100.0).round() as u32;
        let warning = {
            let mut ctx = self.context.lock().expect("context lock poisoned");
            ctx.last_known_context_pct = pct;
            if !ctx.is_synthetic_turn {
                ctx.user_turn_count += 1;
            } else {
                ctx.is_synthetic_turn = false;
            }
            CONTEXT_WARNING_THRESHOLDS
                .iter()
                .copied()
                .find(|t| pct >= *t && ctx.last_warning_pct < *t)
                .inspect(|t| ctx.last_warning_pct = *t)
        };
        if let Some(threshold) = warning {
            tracing::warn!(key = %self.key, pct, threshold, "context window usage crossed threshold");
        }

        self.clear_timeout();
        self.set_state(SessionState::Ready);

        let response = SessionResponse {
            text: accum.text.clone(),
            model: self.model(),
            input_tokens: accum.input_tokens,
            output_tokens: accum.output_tokens,
            cost: accum.cost,
            turns: accum.turns,
            pending_tool_calls: Vec::new(),
        };
        drop(accum);
        self.resolve(response);
    }
}

/// A synthesized 12-hex-char tool_call_id for a passthrough permission
/// request (spec.md §4.C).
fn synthesize_tool_call_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    raw[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn make_session() -> Arc<Session> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Session::new(
            "default".to_string(),
            "up-1".to_string(),
            "claude-code-companion".to_string(),
            tx,
        ))
    }

    #[tokio::test]
    async fn assistant_frame_accumulates_text_and_emits_delta() {
        let session = make_session();
        session.set_state(SessionState::Ready);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        session.attach_progress_sink(progress_tx);
        let _rx = session.begin_request(Duration::from_secs(5));
        session.set_state(SessionState::Busy);

        let frame: protocol::CompanionInbound = serde_json::from_value(serde_json::json!({
            "type": "assistant",
            "message": {
                "content": [{"type": "text", "text": "hi there"}],
                "usage": {"input_tokens": 5, "output_tokens": 2}
            }
        }))
        .unwrap();
        session.handle_inbound(frame, |_, _| protocol::PolicyAction::Allow);

        match progress_rx.recv().await.unwrap() {
            ProgressEvent::TextDelta { text } => assert_eq!(text, "hi there"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn result_frame_resolves_pending_request_once() {
        let session = make_session();
        session.set_state(SessionState::Busy);
        let rx = session.begin_request(Duration::from_secs(5));

        let frame: protocol::CompanionInbound = serde_json::from_value(serde_json::json!({
            "type": "result",
            "data": {"is_error": false, "result": "hello", "total_cost_usd": 0.01, "num_turns": 1}
        }))
        .unwrap();
        session.handle_inbound(frame, |_, _| protocol::PolicyAction::Allow);

        let resolved = rx.await.unwrap().unwrap();
        assert_eq!(resolved.text, "hello");
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn passthrough_permission_parks_and_resolves_with_pending_call() {
        let session = make_session();
        session.set_state(SessionState::Busy);
        let rx = session.begin_request(Duration::from_secs(5));

        let frame: protocol::CompanionInbound = serde_json::from_value(serde_json::json!({
            "type": "permission_request",
            "request_id": "pr_1",
            "tool_name": "Bash",
            "input": {"command": "ls"}
        }))
        .unwrap();
        session.handle_inbound(frame, |_, _| protocol::PolicyAction::Passthrough);

        let resolved = rx.await.unwrap().unwrap();
        assert_eq!(resolved.pending_tool_calls.len(), 1);
        assert_eq!(session.state(), SessionState::WaitingToolDecision);
    }

    #[test]
    fn cli_disconnected_while_idle_is_not_fatal() {
        let session = make_session();
        session.set_state(SessionState::Ready);
        session.handle_inbound(protocol::CompanionInbound::CliDisconnected, |_, _| {
            protocol::PolicyAction::Allow
        });
        assert_eq!(session.state(), SessionState::Ready);
    }
}
