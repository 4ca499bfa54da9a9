//! Page load — admits a visitor and renders the dashboard.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};

use visitrack_services::TrackError;

use super::{client_ip, extract_headers, ApiState};
use crate::render::DashboardPage;

pub async fn handle_index(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, peer, state.trusted_proxy_hops);
    let fields = extract_headers(&headers);

    let admitted = {
        let ip = ip.clone();
        state
            .tracker
            .run_blocking(move |t| t.admit_visitor(&ip, &fields))
            .await
    };

    match admitted {
        Ok(session_id) => {
            let url = page_url(&headers, &state.secret_path);
            let ws_path = ws_path(&state.secret_path);
            let page = DashboardPage {
                session_id: &session_id,
                ip: &ip,
                url: &url,
                ws_path: &ws_path,
                heartbeat_interval_secs: state.heartbeat_interval_secs,
            };
            Html(state.renderer.render_dashboard(&page)).into_response()
        }
        Err(TrackError::RateLimited { retry_after_secs }) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Html(state.renderer.render_rejection(
                "Slow down",
                "Too many requests from your address. Please wait a minute and try again.",
            )),
        )
            .into_response(),
        Err(TrackError::CapacityExceeded { .. }) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Html(state.renderer.render_rejection(
                "No room right now",
                "This page is at capacity. Please try again later.",
            )),
        )
            .into_response(),
        Err(TrackError::Store(e)) => {
            tracing::error!(error = %e, ip = %ip, "page load failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(state.renderer.render_rejection(
                    "Something went wrong",
                    "The session could not be created. Please try again.",
                )),
            )
                .into_response()
        }
    }
}

/// Shareable URL of the page, rebuilt from what the client asked for.
fn page_url(headers: &HeaderMap, secret_path: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|v| *v == "https")
        .unwrap_or("http");
    let secret = secret_path.trim_matches('/');
    if secret.is_empty() {
        format!("{scheme}://{host}/")
    } else {
        format!("{scheme}://{host}/{secret}")
    }
}

fn ws_path(secret_path: &str) -> String {
    let secret = secret_path.trim_matches('/');
    if secret.is_empty() {
        "/ws".to_string()
    } else {
        format!("/{secret}/ws")
    }
}
