//! Stream Fan-out (spec.md §4.F): SSE response body with heartbeats,
//! progress taps, and finish/error handling. Grounded on the teacher's
//! `StreamToSse` mpsc-sink pattern (`loom/src/openai_sse/mod.rs`) — feed
//! events in, read SSE lines out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use bridge_core::{PendingPermission, Session, SessionPool};
use protocol::openai::{
    write_sse_line, ChatCompletionChunk, ChunkChoice, Delta, DeltaToolCall, DeltaToolCallFunction,
    UsageDto,
};
use protocol::ProgressEvent;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn content_chunk(id: &str, model: &str, created: u64, content: String, include_role: bool) -> String {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: ChatCompletionChunk::OBJECT,
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta {
                role: include_role.then_some("assistant"),
                content: Some(content),
                tool_calls: None,
            },
            finish_reason: None,
        }],
        usage: None,
    };
    write_sse_line(&chunk)
}

fn tool_call_chunk(id: &str, model: &str, created: u64, index: u32, call: &PendingPermission) -> String {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: ChatCompletionChunk::OBJECT,
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta {
                role: None,
                content: None,
                tool_calls: Some(vec![DeltaToolCall {
                    index,
                    id: call.tool_call_id.clone(),
                    kind: "function",
                    function: DeltaToolCallFunction {
                        name: Some(format!("cc_{}", call.tool_name.to_ascii_lowercase())),
                        arguments: Some(call.input.to_string()),
                    },
                }]),
            },
            finish_reason: None,
        }],
        usage: None,
    };
    write_sse_line(&chunk)
}

fn finish_chunk(
    id: &str,
    model: &str,
    created: u64,
    finish_reason: &'static str,
    prompt_tokens: u64,
    completion_tokens: u64,
) -> String {
    let chunk = ChatCompletionChunk {
        id: id.to_string(),
        object: ChatCompletionChunk::OBJECT,
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta::default(),
            finish_reason: Some(finish_reason),
        }],
        usage: Some(UsageDto::new(prompt_tokens, completion_tokens)),
    };
    write_sse_line(&chunk)
}

fn progress_line(
    event: ProgressEvent,
    id: &str,
    model: &str,
    created: u64,
    role_sent: &AtomicBool,
    emitted_any: &AtomicBool,
) -> Option<String> {
    let take_role = || !role_sent.swap(true, Ordering::SeqCst);
    match event {
        ProgressEvent::TextDelta { text } => {
            emitted_any.store(true, Ordering::SeqCst);
            Some(content_chunk(id, model, created, text, take_role()))
        }
        ProgressEvent::ToolStart { tool, detail } => {
            let icon = bridge_core::tool_detail::icon_for(&tool);
            Some(content_chunk(
                id,
                model,
                created,
                format!("\n\n_{icon} {detail}_\n\n"),
                take_role(),
            ))
        }
        ProgressEvent::ToolResult { tool, success } => {
            let icon = if success { "✅" } else { "❌" };
            Some(content_chunk(
                id,
                model,
                created,
                format!("_{icon} {tool} done_\n"),
                take_role(),
            ))
        }
        ProgressEvent::Thinking { status } => Some(content_chunk(
            id,
            model,
            created,
            format!("\n_🧠 {status}_\n"),
            take_role(),
        )),
        ProgressEvent::Turn { .. } => None,
    }
}

/// Runs one streaming chat-completions request: attaches as the session's
/// progress sink, starts a 5-second heartbeat, sends the prompt, and
/// converts the result into the SSE body. `prefix` is an optional status
/// line emitted before the real work begins (used for the busy-wait
/// notice in spec.md §4.E). When `wait_key` is set, the session handed in
/// is still busy — this polls `SessionPool::wait_until_ready` for it
/// under the prefix notice before doing anything else, re-binding to
/// whatever session comes back (spec.md §9, busy-wait re-binding).
pub async fn stream_response(
    pool: SessionPool,
    session: Arc<Session>,
    prompt: Option<String>,
    completion_id: String,
    model: String,
    prefix: Option<String>,
    wait_key: Option<String>,
) -> Response {
    let created = unix_now();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let role_sent = Arc::new(AtomicBool::new(false));
    let emitted_any = Arc::new(AtomicBool::new(false));

    if let Some(p) = prefix {
        let take_role = !role_sent.swap(true, Ordering::SeqCst);
        let _ = out_tx.send(content_chunk(&completion_id, &model, created, p, take_role));
    }

    let session = match wait_key {
        Some(key) => match pool.wait_until_ready(&key, &model).await {
            Ok(s) => s,
            Err(e) => {
                let _ = out_tx.send(content_chunk(&completion_id, &model, created, format!("\n\n❌ Error: {e}"), false));
                let _ = out_tx.send("data: [DONE]\n\n".to_string());
                drop(out_tx);
                let stream = UnboundedReceiverStream::new(out_rx).map(|line| Ok::<_, std::io::Error>(line));
                return Response::builder()
                    .status(200)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(Body::from_stream(stream))
                    .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
        },
        None => session,
    };

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    session.attach_progress_sink(progress_tx);

    let heartbeat_tx = out_tx.clone();
    let heartbeat_handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            if heartbeat_tx.send(": heartbeat\n\n".to_string()).is_err() {
                break;
            }
        }
    });

    let forward_tx = out_tx.clone();
    let progress_id = completion_id.clone();
    let progress_model = model.clone();
    let progress_role_sent = Arc::clone(&role_sent);
    let progress_emitted = Arc::clone(&emitted_any);
    let progress_handle = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            if let Some(line) = progress_line(
                event,
                &progress_id,
                &progress_model,
                created,
                &progress_role_sent,
                &progress_emitted,
            ) {
                let _ = forward_tx.send(line);
            }
        }
    });

    let send_result = match prompt {
        Some(p) => pool.send_prompt(&session, p).await,
        None => pool.await_resumed_response(&session).await,
    };
    session.detach_progress_sink();
    heartbeat_handle.abort();
    let _ = progress_handle.await;

    match send_result {
        Ok(response) => {
            if !emitted_any.load(Ordering::SeqCst) && !response.text.is_empty() {
                let take_role = !role_sent.swap(true, Ordering::SeqCst);
                let _ = out_tx.send(content_chunk(&completion_id, &model, created, response.text.clone(), take_role));
            }
            if !response.pending_tool_calls.is_empty() {
                for (i, call) in response.pending_tool_calls.iter().enumerate() {
                    let _ = out_tx.send(tool_call_chunk(&completion_id, &model, created, i as u32, call));
                }
                let _ = out_tx.send(finish_chunk(
                    &completion_id,
                    &model,
                    created,
                    "tool_calls",
                    response.input_tokens,
                    response.output_tokens,
                ));
            } else {
                let _ = out_tx.send(finish_chunk(
                    &completion_id,
                    &model,
                    created,
                    "stop",
                    response.input_tokens,
                    response.output_tokens,
                ));
            }
        }
        Err(e) => {
            let _ = out_tx.send(content_chunk(
                &completion_id,
                &model,
                created,
                format!("\n\n❌ Error: {e}"),
                false,
            ));
        }
    }
    let _ = out_tx.send("data: [DONE]\n\n".to_string());
    drop(out_tx);

    let stream = UnboundedReceiverStream::new(out_rx).map(|line| Ok::<_, std::io::Error>(line));
    let body = Body::from_stream(stream);

    Response::builder()
        .status(200)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
