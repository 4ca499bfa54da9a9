//! Instance status command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct StatusResponse {
    instance_id: String,
    sessions: usize,
    total_sessions: usize,
    open_connections: usize,
    linked_connections: usize,
    limits: LimitsInfo,
}

#[derive(Deserialize)]
struct LimitsInfo {
    max_users_per_instance: usize,
    rate_limit: u32,
    rate_window_secs: u64,
    ttl_secs: u64,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  visitrack instance {}", resp.instance_id);
    println!("═══════════════════════════════════════");
    println!(
        "  Sessions (local)  : {} / {}",
        resp.sessions, resp.limits.max_users_per_instance
    );
    println!("  Sessions (total)  : {}", resp.total_sessions);
    println!(
        "  Connections       : {} open, {} registered",
        resp.open_connections, resp.linked_connections
    );
    println!(
        "  Rate limit        : {} per {}s",
        resp.limits.rate_limit, resp.limits.rate_window_secs
    );
    println!("  Session TTL       : {}s", resp.limits.ttl_secs);

    Ok(())
}
