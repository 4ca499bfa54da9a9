//! HTTP handlers — page load, health, persistent connection, admin API.

pub mod health;
pub mod page;
pub mod sessions;
pub mod ws;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};

use visitrack_core::visitor::{validate_input, MAX_SESSION_ID_LEN};
use visitrack_core::SessionId;
use visitrack_services::Tracker;

use crate::render::PageRenderer;

#[derive(Clone)]
pub struct ApiState {
    pub tracker: Arc<Tracker>,
    pub renderer: Arc<dyn PageRenderer>,
    /// Unlisted path prefix, without slashes.
    pub secret_path: String,
    /// Proxies in front of this instance that append to X-Forwarded-For.
    /// Zero ignores X-Forwarded-For and X-Real-IP altogether.
    pub trusted_proxy_hops: usize,
    /// Handed to the page so it knows how often to heartbeat.
    pub heartbeat_interval_secs: u64,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Request headers kept as visitor metadata, with the key each is stored under.
const TRACKED_HEADERS: &[(&str, &str)] = &[
    ("user-agent", "user_agent"),
    ("accept-language", "accept_language"),
    ("accept-encoding", "accept_encoding"),
    ("referer", "referer"),
    ("dnt", "dnt"),
    ("x-forwarded-proto", "x_forwarded_proto"),
];

/// Client address for rate limiting and display.
///
/// With `trusted_proxy_hops` above zero: the X-Forwarded-For entry that
/// many places from the right, then X-Real-IP, then the socket peer.
/// Entries left of that point were sent by the client and are ignored.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trusted_proxy_hops: usize) -> String {
    if trusted_proxy_hops > 0 {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| forwarded_client(v, trusted_proxy_hops));
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = real {
            return ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// The client's entry in an X-Forwarded-For chain.
///
/// A chain shorter than `hops` was written entirely by trusted proxies, so
/// its leftmost entry is used.
fn forwarded_client(value: &str, hops: usize) -> Option<&str> {
    let entries: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    entries
        .len()
        .checked_sub(hops)
        .map_or(entries.first(), |i| entries.get(i))
        .copied()
}

/// Tracked headers as raw strings keyed by metadata name. Missing headers
/// are stored empty so every session carries the same keys.
pub fn extract_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    TRACKED_HEADERS
        .iter()
        .map(|(header, key)| {
            let value = headers
                .get(*header)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            (key.to_string(), value.to_string())
        })
        .collect()
}

/// Validate a session id taken from a URL path.
fn parse_session_id(raw: &str) -> Result<SessionId, (StatusCode, String)> {
    validate_input(raw, MAX_SESSION_ID_LEN)
        .map(SessionId::from)
        .ok_or((StatusCode::BAD_REQUEST, "invalid session id".to_string()))
}

// Re-export handler functions for use in router setup.
pub use health::handle_health;
pub use page::handle_index;
pub use sessions::{
    handle_session_drop, handle_session_inspect, handle_session_list, handle_status,
};
pub use ws::handle_ws;
