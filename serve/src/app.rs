//! Axum app: shared state and the router (spec.md §6).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderName, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use bridge_core::SessionPool;
use config::{ContextStrategyRegister, Settings};

use crate::routes;

pub struct AppState {
    pub pool: SessionPool,
    pub settings: Arc<Settings>,
    pub strategy: ContextStrategyRegister,
    pub context_manager: Arc<bridge_core::context::ContextManager>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        let strategy = ContextStrategyRegister::new(settings.context_strategy);
        let context_manager = Arc::new(bridge_core::context::ContextManager::new(
            settings.context_dir.clone(),
            settings.summary_trigger_pct,
            settings.summary_recompact_pct,
        ));
        Arc::new(Self {
            pool: SessionPool::new(Arc::clone(&settings)),
            settings,
            strategy,
            context_manager,
            started_at: Instant::now(),
        })
    }
}

/// CORS per spec.md §6: allow all origins, the four verbs, and the
/// client/trace headers.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-session-key"),
            HeaderName::from_static("x-request-id"),
        ])
}

/// Pulls `X-Request-Id` (spec.md §6, "traced only") into the request span so
/// a client-supplied id can be grepped through logs end to end.
fn make_request_span(req: &Request) -> Span {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!("request", method = %req.method(), path = %req.uri().path(), request_id)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::get_health))
        .route("/v1/models", get(routes::models::get_models))
        .route("/v1/chat/completions", post(routes::chat::post_chat_completions))
        .route("/sessions/:key", delete(routes::sessions::delete_session))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(cors_layer())
        .with_state(state)
}
