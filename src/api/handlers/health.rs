use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub scratch: String,
    pub live_handles: usize,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let scratch_status = if tokio::fs::metadata(&state.config.scratch_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        "available"
    } else {
        "unavailable"
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        scratch: scratch_status.to_string(),
        live_handles: state.store.live_handles(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
