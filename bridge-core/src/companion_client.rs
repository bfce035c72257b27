//! Outbound connection to the Companion: session-create/kill over HTTP, and
//! the WebSocket frame pump, grounded on the teacher's own
//! `tokio-tungstenite` remote backend (`cli/src/backend/remote.rs`).

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use protocol::CompanionInbound;

use crate::error::{BridgeError, BridgeResult};
use crate::session::Session;
use crate::tool_policy::PolicyEngine;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    #[serde(rename = "permissionMode")]
    permission_mode: &'a str,
    cwd: &'a str,
}

#[derive(Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
}

pub struct CompanionClient {
    http_base: String,
    ws_base: String,
    http: reqwest::Client,
}

impl CompanionClient {
    pub fn new(companion_url: &str) -> Self {
        let ws_base = to_scheme(companion_url, "ws");
        let http_base = to_scheme(companion_url, "http");
        Self {
            http_base,
            ws_base,
            http: reqwest::Client::new(),
        }
    }

    /// `POST <companion>/api/sessions/create` (spec.md §6).
    pub async fn create_session(&self, permission_mode: &str, cwd: &str) -> BridgeResult<String> {
        let url = format!("{}/api/sessions/create", self.http_base);
        let res = self
            .http
            .post(&url)
            .json(&CreateSessionRequest { permission_mode, cwd })
            .send()
            .await
            .map_err(|e| BridgeError::UpstreamUnavailable(e.to_string()))?;
        if !res.status().is_success() {
            return Err(BridgeError::UpstreamUnavailable(format!(
                "session create returned {}",
                res.status()
            )));
        }
        let body: CreateSessionResponse = res
            .json()
            .await
            .map_err(|e| BridgeError::UpstreamUnavailable(e.to_string()))?;
        Ok(body.session_id)
    }

    /// `POST <companion>/api/sessions/<id>/kill`, best-effort.
    pub async fn kill_session(&self, upstream_session_id: &str) {
        let url = format!("{}/api/sessions/{}/kill", self.http_base, upstream_session_id);
        if let Err(e) = self.http.post(&url).send().await {
            tracing::warn!(upstream_session_id, error = %e, "best-effort session kill failed");
        }
    }

    /// Opens `ws://<companion>/ws/browser/<upstream id>`, spawns the reader
    /// and writer pumps, and returns the channel the [`Session`] uses to
    /// send outbound frames.
    pub async fn connect(
        &self,
        upstream_session_id: &str,
        key: String,
        model: String,
        policy: Arc<PolicyEngine>,
    ) -> BridgeResult<Arc<Session>> {
        let url = format!("{}/ws/browser/{}", self.ws_base, upstream_session_id);
        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url))
            .await
            .map_err(|_| BridgeError::UpstreamUnavailable("websocket connect timed out".to_string()))?
            .map_err(|e| BridgeError::UpstreamUnavailable(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let session = Arc::new(Session::new(
            key,
            upstream_session_id.to_string(),
            model,
            outbound_tx,
        ));

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let reader_session = Arc::clone(&session);
        tokio::spawn(async move {
            loop {
                match read.next().await {
                    Some(Ok(msg)) => {
                        if let Message::Text(text) = msg {
                            match serde_json::from_str::<CompanionInbound>(&text) {
                                Ok(frame) => {
                                    let policy = Arc::clone(&policy);
                                    reader_session.handle_inbound(frame, move |tool, input| {
                                        policy.decide(tool, input)
                                    });
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "failed to parse companion frame");
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "companion websocket error");
                        break;
                    }
                    None => break,
                }
            }
            reader_session.handle_socket_closed();
        });

        Ok(session)
    }
}

fn to_scheme(url: &str, target: &str) -> String {
    let secure = url.starts_with("wss://") || url.starts_with("https://");
    let rest = url
        .splitn(2, "://")
        .nth(1)
        .unwrap_or(url)
        .trim_end_matches('/');
    let scheme = if secure { format!("{target}s") } else { target.to_string() };
    format!("{scheme}://{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_scheme_rewrites_ws_to_http() {
        assert_eq!(to_scheme("ws://127.0.0.1:4000", "http"), "http://127.0.0.1:4000");
        assert_eq!(to_scheme("http://127.0.0.1:4000/", "ws"), "ws://127.0.0.1:4000");
        assert_eq!(to_scheme("wss://example.com", "http"), "https://example.com");
    }
}
