//! visitrackd — live visitor registry daemon.
//!
//! Serves the page, the persistent-connection endpoint and `/health` on the
//! public port, the admin API on loopback, and runs the expiry sweeper.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use visitrack_api::{ApiState, HtmlRenderer};
use visitrack_core::config::VisitrackConfig;
use visitrack_services::{Sweeper, Tracker, TrackerConfig};

mod backend;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = VisitrackConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = VisitrackConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        VisitrackConfig::default()
    });

    let instance_id = config.instance.resolve();
    tracing::info!(
        instance_id = %instance_id,
        max_users = config.limits.max_users_per_instance,
        ttl_secs = config.sessions.ttl_secs,
        "visitrackd starting"
    );

    let backend = backend::open(&config)?;
    let tracker = Arc::new(Tracker::new(
        TrackerConfig::from_config(&config, instance_id),
        backend.store,
        backend.limiter,
    ));

    let state = ApiState {
        tracker: tracker.clone(),
        renderer: Arc::new(HtmlRenderer),
        secret_path: config.server.secret_path.clone(),
        trusted_proxy_hops: if config.server.trust_proxy_headers {
            config.server.trusted_proxy_hops
        } else {
            0
        },
        heartbeat_interval_secs: config.sessions.heartbeat_interval_secs,
    };

    let public_addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = TcpListener::bind(&public_addr)
        .await
        .with_context(|| format!("failed to bind {public_addr}"))?;
    let admin_addr = format!("127.0.0.1:{}", config.server.admin_port);
    let admin_listener = TcpListener::bind(&admin_addr)
        .await
        .with_context(|| format!("failed to bind {admin_addr}"))?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let sweeper_task = tokio::spawn(
        Sweeper::new(tracker.clone(), config.sessions.sweep_interval()).run(shutdown_tx.subscribe()),
    );

    let public_task = {
        let state = state.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = visitrack_api::serve(state, listener, shutdown).await {
                tracing::error!(error = %e, "public server failed");
            }
        })
    };

    let admin_task = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = visitrack_api::serve_admin(state, admin_listener, shutdown).await {
                tracing::error!(error = %e, "admin server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = sweeper_task       => tracing::error!("sweeper exited: {:?}", r),
        r = public_task        => tracing::error!("public server exited: {:?}", r),
        r = admin_task         => tracing::error!("admin server exited: {:?}", r),
    }

    Ok(())
}
