//! `GET /v1/models` (spec.md §6): one entry whose `id` is `MODEL_NAME`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use protocol::openai::{ModelInfo, ModelsResponse};

use crate::app::AppState;
use crate::stream::unix_now;

pub async fn get_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        object: "list",
        data: vec![ModelInfo {
            id: state.settings.model_name.clone(),
            object: "model",
            created: unix_now(),
            owned_by: "companion-bridge",
        }],
    })
}
