//! /health — local and total session counts.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use super::ApiState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Active sessions created by this instance.
    pub connections: usize,
    /// Active sessions across all instances.
    pub total_connections: usize,
    pub instance_id: String,
}

#[derive(Serialize)]
pub struct HealthError {
    pub status: &'static str,
    pub error: String,
    pub instance_id: String,
}

pub async fn handle_health(
    State(state): State<ApiState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthError>)> {
    match state.tracker.run_blocking(|t| t.health()).await {
        Ok(health) => Ok(Json(HealthResponse {
            status: "healthy",
            connections: health.connections,
            total_connections: health.total_connections,
            instance_id: health.instance_id,
        })),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthError {
                    status: "unhealthy",
                    error: e.to_string(),
                    instance_id: state.tracker.instance_id().to_string(),
                }),
            ))
        }
    }
}
