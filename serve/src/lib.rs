//! OpenAI-compatible HTTP front end for the companion bridge (axum).
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

pub mod app;
pub mod routes;
pub mod stream;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use app::{router, AppState};
use config::Settings;

/// Runs the HTTP server on an existing listener. Used by tests (bind to
/// `127.0.0.1:0`, then pass the listener in to learn the assigned port).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    settings: Arc<Settings>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!(%addr, companion = %settings.companion_url, "bridge listening");

    let state = AppState::new(settings);
    let app = router(Arc::clone(&state));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

/// Runs the HTTP server on `127.0.0.1:{ADAPTER_PORT}`.
pub async fn run_serve(settings: Arc<Settings>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("127.0.0.1:{}", settings.adapter_port);
    let listener = TcpListener::bind(&addr).await?;
    run_serve_on_listener(listener, settings).await
}

/// Waits for Ctrl-C, then tears down every live session so the companion
/// server doesn't hold orphaned agent processes past our own shutdown.
async fn shutdown_signal(state: Arc<AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, destroying live sessions");
    state.pool.destroy_all().await;
}
