use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_ok = tokio::fs::metadata(&state.config.downloads_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let (status, storage) = if storage_ok {
        ("ok", "available")
    } else {
        ("degraded", "unavailable")
    };

    Json(HealthResponse {
        status: status.to_string(),
        storage: storage.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
