//! Admin handlers — instance status and session inspection/management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use visitrack_core::{Metadata, Session};
use visitrack_services::StoreError;

use super::{parse_session_id, ApiState};

fn unavailable(e: StoreError) -> (StatusCode, String) {
    tracing::warn!(error = %e, "admin request failed");
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub instance_id: String,
    /// Active sessions created by this instance.
    pub sessions: usize,
    pub total_sessions: usize,
    pub open_connections: usize,
    pub linked_connections: usize,
    pub limits: LimitsInfo,
}

#[derive(Serialize)]
pub struct LimitsInfo {
    pub max_users_per_instance: usize,
    pub rate_limit: u32,
    pub rate_window_secs: u64,
    pub ttl_secs: u64,
}

pub async fn handle_status(
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, (StatusCode, String)> {
    let tracker = &state.tracker;
    let health = tracker
        .run_blocking(|t| t.health())
        .await
        .map_err(unavailable)?;
    let config = tracker.config();

    Ok(Json(StatusResponse {
        instance_id: health.instance_id,
        sessions: health.connections,
        total_sessions: health.total_connections,
        open_connections: tracker.connections().open_count(),
        linked_connections: tracker.connections().linked_count(),
        limits: LimitsInfo {
            max_users_per_instance: config.max_users_per_instance,
            rate_limit: config.rate_limit,
            rate_window_secs: config.rate_window.as_secs(),
            ttl_secs: config.ttl.as_secs(),
        },
    }))
}

// ── /sessions ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub ip: String,
    pub instance_id: String,
    pub created_at: u64,
    pub last_seen_at: u64,
    pub metadata: Metadata,
}

impl From<Session> for SessionInfo {
    fn from(s: Session) -> Self {
        Self {
            session_id: s.session_id.into_string(),
            ip: s.ip,
            instance_id: s.instance_id,
            created_at: s.created_at,
            last_seen_at: s.last_seen_at,
            metadata: s.metadata,
        }
    }
}

#[derive(Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

pub async fn handle_session_list(
    State(state): State<ApiState>,
) -> Result<Json<SessionListResponse>, (StatusCode, String)> {
    let sessions = state
        .tracker
        .run_blocking(|t| t.store().list_active())
        .await
        .map_err(unavailable)?
        .into_iter()
        .map(SessionInfo::from)
        .collect();
    Ok(Json(SessionListResponse { sessions }))
}

// ── /sessions/{id} (GET) ─────────────────────────────────────────────────────

pub async fn handle_session_inspect(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, (StatusCode, String)> {
    let id = parse_session_id(&session_id)?;

    let session = state
        .tracker
        .run_blocking(move |t| t.store().get(&id))
        .await
        .map_err(unavailable)?
        .ok_or((StatusCode::NOT_FOUND, "session not found".to_string()))?;

    Ok(Json(session.into()))
}

// ── /sessions/{id} (DELETE) ──────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionDropResponse {
    pub session_id: String,
    pub dropped: bool,
}

pub async fn handle_session_drop(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDropResponse>, (StatusCode, String)> {
    let id = parse_session_id(&session_id)?;
    let dropped = {
        let id = id.clone();
        state
            .tracker
            .run_blocking(move |t| t.drop_session(&id))
            .await
            .map_err(unavailable)?
    };

    if dropped {
        tracing::info!(session_id = %id, "session dropped via API");
    }

    Ok(Json(SessionDropResponse {
        session_id,
        dropped,
    }))
}
