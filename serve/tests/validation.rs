//! Request-validation tests that don't require a live Companion backend:
//! `/health`, `/v1/models`, and the `chat/completions` input checks that
//! are rejected before any session is touched.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use config::Settings;
use serve::app::{router, AppState};

fn test_settings() -> Arc<Settings> {
    Arc::new(Settings {
        companion_url: "ws://127.0.0.1:1".to_string(),
        adapter_port: 0,
        session_cwd: ".".to_string(),
        permission_mode: "default".to_string(),
        model_name: "claude-code-companion".to_string(),
        tool_mode: "auto".to_string(),
        tool_policy: config::default_tool_policy(protocol::PolicyAction::Allow),
        log_format: "pretty".to_string(),
        response_timeout_ms: 200,
        session_idle_timeout_ms: 1_000,
        max_sessions: 10,
        context_strategy: config::ContextStrategy::Summary,
        summary_trigger_pct: 40,
        summary_recompact_pct: 20,
        context_dir: ".".to_string(),
    })
}

#[tokio::test]
async fn health_reports_configured_model() {
    let app = router(AppState::new(test_settings()));
    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["model"], "claude-code-companion");
    assert_eq!(json["status"], "ok");
    assert!(json["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn models_lists_one_entry_matching_settings() {
    let app = router(AppState::new(test_settings()));
    let resp = app
        .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"][0]["id"], "claude-code-companion");
}

#[tokio::test]
async fn empty_messages_is_rejected() {
    let app = router(AppState::new(test_settings()));
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"messages":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn unsupported_role_is_rejected() {
    let app = router(AppState::new(test_settings()));
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"messages":[{"role":"developer","content":"hi"}]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_user_text_is_rejected() {
    let app = router(AppState::new(test_settings()));
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"messages":[{"role":"user","content":"   "}]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
