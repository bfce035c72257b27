//! `POST /v1/chat/completions` (spec.md §4.E): the main request dispatcher.
//! Session-key derivation, `!bridge` command interception, tool-answer
//! forwarding, busy/dead-session handling, and the streaming/non-streaming
//! fork.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use uuid::Uuid;

use bridge_core::{BridgeError, SessionState};
use protocol::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChoiceDto, ErrorResponse, ResponseMessage,
    ResponseToolCall, ResponseToolCallFunction, UsageDto,
};

use crate::app::AppState;
use crate::stream::{stream_response, unix_now};

const APPROVAL_WORDS: [&str; 9] = [
    "approved", "allow", "allowed", "yes", "true", "ok", "accept", "permit", "granted",
];

fn error_response(status: StatusCode, message: impl Into<String>, error_type: &'static str) -> Response {
    (status, Json(ErrorResponse::new(message, error_type))).into_response()
}

fn bridge_error_response(err: BridgeError) -> Response {
    match err {
        BridgeError::InvalidRequest(m) => error_response(StatusCode::BAD_REQUEST, m, "invalid_request_error"),
        BridgeError::UpstreamUnavailable(m) => error_response(StatusCode::BAD_GATEWAY, m, "server_error"),
        BridgeError::ResponseTimeout => error_response(StatusCode::TOO_MANY_REQUESTS, err.to_string(), "server_error"),
        BridgeError::SessionDead => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), "server_error"),
        BridgeError::Io(_) | BridgeError::Serde(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), "server_error")
        }
    }
}

/// Priority: `X-Session-Key` header → `key:<value>`; else body `model` →
/// `model:<value>`; else `"default"` (spec.md §4.E). Never derived from a
/// per-request id or system-prompt content.
fn session_key(headers: &HeaderMap, model: &Option<String>) -> String {
    if let Some(v) = headers.get("x-session-key").and_then(|v| v.to_str().ok()) {
        if !v.trim().is_empty() {
            return format!("key:{}", v.trim());
        }
    }
    match model {
        Some(m) if !m.trim().is_empty() => format!("model:{}", m.trim()),
        _ => "default".to_string(),
    }
}

fn normalize_approval(raw: &str) -> bool {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    APPROVAL_WORDS.contains(&cleaned.as_str())
}

pub async fn post_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> Response {
    if req.messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "messages must not be empty", "invalid_request_error");
    }
    for m in &req.messages {
        if !matches!(m.role.as_str(), "system" | "user" | "assistant" | "tool") {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unsupported role: {}", m.role),
                "invalid_request_error",
            );
        }
    }

    let key = session_key(&headers, &req.model);
    let model_hint = req.model.clone().unwrap_or_else(|| state.settings.model_name.clone());
    let completion_id = format!("chatcmpl-{}", Uuid::new_v4().simple());

    // role: "tool" messages answer a previously surfaced permission request
    // rather than carrying a new prompt (spec.md §4.E).
    let tool_answers: Vec<_> = req
        .messages
        .iter()
        .filter(|m| m.role == "tool")
        .filter_map(|m| m.tool_call_id.clone().map(|id| (id, m)))
        .collect();

    if !tool_answers.is_empty() {
        let session = match state.pool.get_session(&key, &model_hint).await {
            Ok(s) => s,
            Err(e) => return bridge_error_response(e),
        };
        // Real OpenAI clients resend full history, so a later turn can still
        // carry an already-resolved tool message; only treat it as a fresh
        // answer if the session is actually waiting on one (spec.md §4.E).
        if session.state() == SessionState::WaitingToolDecision {
            for (tool_call_id, message) in &tool_answers {
                let text = message.content.as_ref().map(|c| c.as_text()).unwrap_or_default();
                let approved = normalize_approval(&text);
                let note = if approved { None } else { Some(text.clone()) };
                if let Err(e) = state.pool.resolve_tool_permission(&session, tool_call_id, approved, note) {
                    return bridge_error_response(e);
                }
            }
            return finish_dispatch(state, session, None, completion_id, model_hint, req.stream, None, None).await;
        }
    }

    let prompt = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .and_then(|m| m.content.as_ref())
        .map(|c| c.as_text())
        .unwrap_or_default();

    if prompt.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "the latest user message has no text", "invalid_request_error");
    }

    let session = match state.pool.get_session(&key, &model_hint).await {
        Ok(s) => s,
        Err(e) => return bridge_error_response(e),
    };

    if let Some(result) = bridge_core::command_interceptor::intercept(
        &prompt,
        &key,
        &session,
        &state.strategy,
        &state.context_manager,
        state.settings.summary_trigger_pct,
        state.settings.summary_recompact_pct,
    ) {
        if result.destroy_session {
            state.pool.destroy_session(&key, "!bridge reset").await;
        }
        return command_response(req.stream, completion_id, model_hint, result.text);
    }

    let wrapped = state.context_manager.wrap_prompt(&session, state.strategy.get(), &prompt);

    let (session, prefix, wait_key) = match session.state() {
        SessionState::Busy | SessionState::WaitingToolDecision => {
            if req.stream {
                (session, Some("_waiting for the previous task to finish…_".to_string()), Some(key.clone()))
            } else {
                match state.pool.wait_until_ready(&key, &model_hint).await {
                    Ok(s) => (s, None, None),
                    Err(e) => return bridge_error_response(e),
                }
            }
        }
        SessionState::Dead => {
            state.pool.destroy_session(&key, "session died before dispatch").await;
            match state.pool.get_session(&key, &model_hint).await {
                Ok(s) => (s, None, None),
                Err(e) => return bridge_error_response(e),
            }
        }
        _ => (session, None, None),
    };

    finish_dispatch(state, session, Some(wrapped), completion_id, model_hint, req.stream, prefix, wait_key).await
}

#[allow(clippy::too_many_arguments)]
async fn finish_dispatch(
    state: Arc<AppState>,
    session: Arc<bridge_core::Session>,
    prompt: Option<String>,
    completion_id: String,
    model: String,
    stream: bool,
    prefix: Option<String>,
    wait_key: Option<String>,
) -> Response {
    if stream {
        return stream_response(state.pool.clone(), session, prompt, completion_id, model, prefix, wait_key).await;
    }

    let outcome = match prompt {
        Some(p) => state.pool.send_prompt(&session, p).await,
        None => state.pool.await_resumed_response(&session).await,
    };
    match outcome {
        Ok(resp) => {
            let (finish_reason, tool_calls) = if resp.pending_tool_calls.is_empty() {
                ("stop", None)
            } else {
                let calls = resp
                    .pending_tool_calls
                    .iter()
                    .map(|c| ResponseToolCall {
                        id: c.tool_call_id.clone(),
                        kind: "function",
                        function: ResponseToolCallFunction {
                            name: format!("cc_{}", c.tool_name.to_ascii_lowercase()),
                            arguments: c.input.to_string(),
                        },
                    })
                    .collect();
                ("tool_calls", Some(calls))
            };
            let body = ChatCompletionResponse {
                id: completion_id,
                object: "chat.completion",
                created: unix_now(),
                model: resp.model.clone(),
                choices: vec![ChoiceDto {
                    index: 0,
                    message: ResponseMessage {
                        role: "assistant",
                        content: (!resp.text.is_empty()).then(|| resp.text.clone()),
                        tool_calls,
                    },
                    finish_reason,
                }],
                usage: UsageDto::new(resp.input_tokens, resp.output_tokens),
            };
            Json(body).into_response()
        }
        Err(e) => bridge_error_response(e),
    }
}

fn command_response(stream: bool, completion_id: String, model: String, text: String) -> Response {
    if stream {
        let body = protocol::openai::write_sse_line(&protocol::openai::ChatCompletionChunk {
            id: completion_id.clone(),
            object: protocol::openai::ChatCompletionChunk::OBJECT,
            created: unix_now(),
            model: model.clone(),
            choices: vec![protocol::openai::ChunkChoice {
                index: 0,
                delta: protocol::openai::Delta {
                    role: Some("assistant"),
                    content: Some(text),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        }) + &protocol::openai::write_sse_line(&protocol::openai::ChatCompletionChunk {
            id: completion_id,
            object: protocol::openai::ChatCompletionChunk::OBJECT,
            created: unix_now(),
            model,
            choices: vec![protocol::openai::ChunkChoice {
                index: 0,
                delta: protocol::openai::Delta::default(),
                finish_reason: Some("stop"),
            }],
            usage: Some(UsageDto::default()),
        }) + "data: [DONE]\n\n";
        Response::builder()
            .status(200)
            .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
            .body(axum::body::Body::from(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    } else {
        Json(ChatCompletionResponse {
            id: completion_id,
            object: "chat.completion",
            created: unix_now(),
            model,
            choices: vec![ChoiceDto {
                index: 0,
                message: ResponseMessage {
                    role: "assistant",
                    content: Some(text),
                    tool_calls: None,
                },
                finish_reason: "stop",
            }],
            usage: UsageDto::default(),
        })
        .into_response()
    }
}
