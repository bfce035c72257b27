//! `GET /health` (spec.md §6, supplemented with `uptime_secs` per §10).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    companion: String,
    cwd: String,
    #[serde(rename = "toolMode")]
    tool_mode: String,
    #[serde(rename = "permissionMode")]
    permission_mode: String,
    model: String,
    sessions: Vec<bridge_core::SessionSnapshot>,
    uptime_secs: u64,
}

pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        companion: state.settings.companion_url.clone(),
        cwd: state.settings.session_cwd.clone(),
        tool_mode: state.settings.tool_mode.clone(),
        permission_mode: state.settings.permission_mode.clone(),
        model: state.settings.model_name.clone(),
        sessions: state.pool.list_sessions(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
