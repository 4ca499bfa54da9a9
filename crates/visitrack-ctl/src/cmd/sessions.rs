//! Session listing, inspection and removal commands.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, delete_json, get_json};

#[derive(Deserialize)]
struct SessionListResponse {
    sessions: Vec<SessionInfo>,
}

#[derive(Deserialize)]
struct SessionInfo {
    session_id: String,
    ip: String,
    instance_id: String,
    created_at: u64,
    last_seen_at: u64,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct SessionDropResponse {
    session_id: String,
    dropped: bool,
}

fn meta_str<'a>(info: &'a SessionInfo, key: &str) -> &'a str {
    info.metadata
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("-")
}

/// Seconds between two unix-millisecond timestamps.
fn secs_between(earlier: u64, later: u64) -> u64 {
    later.saturating_sub(earlier) / 1000
}

pub async fn cmd_sessions(port: u16) -> Result<()> {
    let resp: SessionListResponse = get_json(&format!("{}/sessions", base_url(port))).await?;

    if resp.sessions.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Active Sessions ({})", resp.sessions.len());
    println!("═══════════════════════════════════════");

    let newest = resp
        .sessions
        .iter()
        .map(|s| s.last_seen_at)
        .max()
        .unwrap_or_default();

    for s in &resp.sessions {
        println!("  ┌─ {}", s.session_id);
        println!("  │  ip        : {}", s.ip);
        println!("  │  instance  : {}", s.instance_id);
        println!(
            "  │  client    : {} on {}",
            meta_str(s, "browser"),
            meta_str(s, "os")
        );
        println!(
            "  └─ last seen: {}s before newest",
            secs_between(s.last_seen_at, newest)
        );
    }

    Ok(())
}

pub async fn cmd_session_inspect(port: u16, session_id: &str) -> Result<()> {
    let s: SessionInfo =
        get_json(&format!("{}/sessions/{}", base_url(port), session_id)).await?;

    println!("═══════════════════════════════════════");
    println!("  Session {}", s.session_id);
    println!("═══════════════════════════════════════");
    println!("  IP            : {}", s.ip);
    println!("  Instance      : {}", s.instance_id);
    println!("  Created at    : {} (unix ms)", s.created_at);
    println!("  Last seen at  : {} (unix ms)", s.last_seen_at);
    println!(
        "  Age at last heartbeat : {}s",
        secs_between(s.created_at, s.last_seen_at)
    );

    if !s.metadata.is_empty() {
        println!("\n  Metadata:");
        for (key, value) in &s.metadata {
            match value.as_str() {
                Some(text) => println!("    {:<18}: {}", key, text),
                None => println!("    {:<18}: {}", key, value),
            }
        }
    }

    Ok(())
}

pub async fn cmd_session_drop(port: u16, session_id: &str) -> Result<()> {
    let resp: SessionDropResponse =
        delete_json(&format!("{}/sessions/{}", base_url(port), session_id)).await?;

    if resp.dropped {
        println!("Session {} dropped.", resp.session_id);
    } else {
        println!("Session {} not found.", resp.session_id);
    }

    Ok(())
}
