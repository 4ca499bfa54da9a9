//! visitrack-api — HTTP surfaces of one instance.
//!
//! The public router serves the page load, `/health` and the persistent
//! connection. The admin router exposes instance state as JSON under
//! `/api` and is bound to loopback only.

pub mod handlers;
pub mod render;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;
pub use render::{dashboard_html, DashboardPage, HtmlRenderer, PageRenderer};

/// Public routes: page load, health, persistent connection.
///
/// The page is reachable at `/` and under the unlisted secret path, with
/// and without a trailing slash.
pub fn router(state: ApiState) -> Router {
    let secret = state.secret_path.trim_matches('/').to_string();

    let mut app = Router::new()
        .route("/", get(handlers::handle_index))
        .route("/health", get(handlers::handle_health))
        .route("/ws", get(handlers::handle_ws));

    if !secret.is_empty() {
        app = app
            .route(&format!("/{secret}"), get(handlers::handle_index))
            .route(&format!("/{secret}/"), get(handlers::handle_index))
            .route(&format!("/{secret}/ws"), get(handlers::handle_ws));
    }

    app.with_state(state)
}

/// Admin routes, nested under `/api`.
pub fn admin_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/sessions", get(handlers::handle_session_list))
        .route(
            "/sessions/{id}",
            get(handlers::handle_session_inspect).delete(handlers::handle_session_drop),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Serve the public router on `listener` until `shutdown` fires.
pub async fn serve(
    state: ApiState,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, instance_id = %state.tracker.instance_id(), "public server listening");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

/// Serve the admin API on `listener` until `shutdown` fires. The daemon
/// binds it to loopback.
pub async fn serve_admin(
    state: ApiState,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "admin API listening");

    axum::serve(listener, admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
