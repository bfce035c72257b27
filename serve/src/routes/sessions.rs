//! `DELETE /sessions/<key>` (spec.md §6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn delete_session(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Json<Value> {
    state.pool.destroy_session(&key, "client requested deletion").await;
    Json(json!({"ok": true}))
}
