//! End-to-end test of `CompanionClient::connect` against a mock Companion
//! WebSocket server: connect, receive `cli_connected`, send a prompt,
//! stream an `assistant` frame, then resolve with a `result` frame.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use bridge_core::{CompanionClient, PolicyEngine};
use config::default_tool_policy;
use protocol::PolicyAction;

async fn spawn_mock_companion() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock companion");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept tcp");
        let ws = tokio_tungstenite::accept_async(stream).await.expect("accept ws");
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(
                r#"{"type":"session_init","session":{"model":"claude-code-companion"}}"#.to_string(),
            ))
            .await
            .expect("send session_init");
        write
            .send(Message::Text(r#"{"type":"cli_connected"}"#.to_string()))
            .await
            .expect("send cli_connected");

        // Wait for the bridge's user_message before answering, so the
        // resolver is armed before the result frame arrives.
        let _ = read.next().await;

        write
            .send(Message::Text(
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi there"}],"usage":{"input_tokens":3,"output_tokens":2}}}"#
                    .to_string(),
            ))
            .await
            .expect("send assistant");
        write
            .send(Message::Text(
                r#"{"type":"result","data":{"is_error":false,"result":"hi there","total_cost_usd":0.01,"num_turns":1,"usage":{"input_tokens":3,"output_tokens":2}}}"#
                    .to_string(),
            ))
            .await
            .expect("send result");
    });

    (format!("ws://{addr}"), handle)
}

#[tokio::test]
async fn connect_then_prompt_resolves_with_assistant_text() {
    let (ws_base, server) = spawn_mock_companion().await;
    let policy = Arc::new(PolicyEngine::new(default_tool_policy(PolicyAction::Allow)));

    let client = CompanionClient::new(&ws_base);
    let session = client
        .connect("upstream-1", "default".to_string(), "claude-code-companion".to_string(), policy)
        .await
        .expect("connect");

    tokio::time::timeout(Duration::from_secs(2), async {
        session.wait_for_ready().await.expect("ready channel").expect("connect ok");
    })
    .await
    .expect("session became ready");

    let rx = session.begin_request(Duration::from_secs(2));
    session.send_user_message("hello".to_string()).expect("send prompt");

    let response = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("request did not time out")
        .expect("resolver channel closed")
        .expect("request resolved with an error");

    assert_eq!(response.text, "hi there");
    assert_eq!(response.input_tokens, 3);
    assert_eq!(response.output_tokens, 2);
    assert!(response.pending_tool_calls.is_empty());

    server.await.expect("mock companion task");
}
