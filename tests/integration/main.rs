//! visitrack integration test harness.
//!
//! Each test starts one or more instances in-process: the real public and
//! admin routers bound to 127.0.0.1:0, backed by a store the test controls.
//! Instances that share a store behave like replicas behind a load
//! balancer. Page loads go through reqwest with an X-Forwarded-For header
//! so each test picks its client addresses; persistent connections go
//! through tokio-tungstenite.
//!
//!   cargo test --test integration

mod admin;
mod health;
mod multi_instance;
mod page;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use visitrack_api::{ApiState, HtmlRenderer};
use visitrack_services::{
    FixedWindowLimiter, MemoryStore, RateLimiter, SessionStore, SqliteStore, SystemClock,
    Tracker, TrackerConfig,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SECRET: &str = "app-test";
pub const TTL: Duration = Duration::from_secs(60);
const WAIT: Duration = Duration::from_secs(5);

pub type Ws = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// A store that several instances can share.
pub fn shared_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(TTL, Arc::new(SystemClock)))
}

/// SQLite database file that several instances open, the way replicas on
/// one host share sessions and rate-limit buckets. Removed on drop.
pub struct SharedDb {
    /// Handle the test itself inspects the database through.
    pub store: Arc<SqliteStore>,
    path: std::path::PathBuf,
    dir: std::path::PathBuf,
}

impl SharedDb {
    pub fn open(name: &str) -> Result<Self> {
        let dir = std::env::temp_dir().join(format!(
            "visitrack-integration-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("sessions.db");
        let store = SqliteStore::open(&path, TTL, Arc::new(SystemClock))?;
        Ok(Self {
            store: Arc::new(store),
            path,
            dir,
        })
    }

    /// Options for an instance with its own handle on this database, used
    /// for both sessions and rate limiting.
    pub fn options(&self, instance_id: &'static str, max_users: usize) -> Result<ServerOptions> {
        let handle = Arc::new(SqliteStore::open(&self.path, TTL, Arc::new(SystemClock))?);
        Ok(ServerOptions::new(instance_id, max_users)
            .store(handle.clone())
            .limiter(handle))
    }
}

impl Drop for SharedDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub struct ServerOptions {
    pub instance_id: &'static str,
    pub max_users: usize,
    pub rate_limit: u32,
    pub store: Arc<dyn SessionStore>,
    pub limiter: Arc<dyn RateLimiter>,
}

impl ServerOptions {
    pub fn new(instance_id: &'static str, max_users: usize) -> Self {
        Self {
            instance_id,
            max_users,
            rate_limit: 20,
            store: shared_store(),
            limiter: Arc::new(FixedWindowLimiter::new(Arc::new(SystemClock))),
        }
    }

    pub fn rate_limit(mut self, limit: u32) -> Self {
        self.rate_limit = limit;
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }
}

/// One running instance. Dropping it shuts both servers down.
pub struct TestServer {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub tracker: Arc<Tracker>,
    client: reqwest::Client,
    shutdown: broadcast::Sender<()>,
}

pub async fn spawn_server(opts: ServerOptions) -> Result<TestServer> {
    let config = TrackerConfig {
        instance_id: opts.instance_id.to_string(),
        max_users_per_instance: opts.max_users,
        rate_limit: opts.rate_limit,
        rate_window: Duration::from_secs(60),
        ttl: TTL,
    };
    let tracker = Arc::new(Tracker::new(config, opts.store, opts.limiter));

    let state = ApiState {
        tracker: tracker.clone(),
        renderer: Arc::new(HtmlRenderer),
        secret_path: SECRET.to_string(),
        trusted_proxy_hops: 1,
        heartbeat_interval_secs: 15,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let admin_listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let admin_addr = admin_listener.local_addr()?;

    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(visitrack_api::serve(
        state.clone(),
        listener,
        shutdown.subscribe(),
    ));
    tokio::spawn(visitrack_api::serve_admin(
        state,
        admin_listener,
        shutdown.subscribe(),
    ));

    Ok(TestServer {
        addr,
        admin_addr,
        tracker,
        client: reqwest::Client::new(),
        shutdown,
    })
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}/api{}", self.admin_addr, path)
    }

    /// Page load at the secret path as client `ip`.
    pub async fn load_page(&self, ip: &str) -> Result<reqwest::Response> {
        self.get_as(&format!("/{SECRET}"), ip).await
    }

    pub async fn get_as(&self, path: &str, ip: &str) -> Result<reqwest::Response> {
        self.client
            .get(self.url(path))
            .header("x-forwarded-for", ip)
            .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0")
            .send()
            .await
            .context("page request failed")
    }

    /// Load the page as `ip` and return the session id it was given.
    pub async fn admit(&self, ip: &str) -> Result<String> {
        let resp = self.load_page(ip).await?;
        if resp.status() != reqwest::StatusCode::OK {
            bail!("page load as {ip} returned {}", resp.status());
        }
        session_id_from_page(&resp.text().await?).context("page carries no session id")
    }

    /// Open a persistent connection and consume the snapshot sent on open.
    pub async fn connect(&self) -> Result<(Ws, serde_json::Value)> {
        let url = format!("ws://{}/{}/ws", self.addr, SECRET);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await?;
        let snapshot = next_of_type(&mut ws, "sessions_update").await?;
        Ok((ws, snapshot["sessions"].clone()))
    }
}

/// Pull the session id out of a rendered dashboard page.
pub fn session_id_from_page(html: &str) -> Option<String> {
    let marker = "data-session-id=\"";
    let start = html.find(marker)? + marker.len();
    let len = html[start..].find('"')?;
    Some(html[start..start + len].to_string())
}

pub async fn send(ws: &mut Ws, frame: serde_json::Value) -> Result<()> {
    ws.send(Message::Text(frame.to_string().into())).await?;
    Ok(())
}

/// Next JSON text frame.
pub async fn next_json(ws: &mut Ws) -> Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .context("timed out waiting for a frame")?
            .context("connection closed")??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

/// Next frame with the given `type`, skipping others.
pub async fn next_of_type(ws: &mut Ws, kind: &str) -> Result<serde_json::Value> {
    loop {
        let frame = next_json(ws).await?;
        if frame["type"] == kind {
            return Ok(frame);
        }
    }
}

/// Read `sessions_update` frames until one lists exactly `ids`, in any order.
pub async fn wait_for_sessions(ws: &mut Ws, ids: &[&str]) -> Result<()> {
    let mut want: Vec<&str> = ids.to_vec();
    want.sort_unstable();
    loop {
        let frame = next_of_type(ws, "sessions_update").await?;
        let mut got: Vec<String> = frame["sessions"]
            .as_array()
            .context("sessions is not an array")?
            .iter()
            .filter_map(|s| s["id"].as_str().map(str::to_string))
            .collect();
        got.sort_unstable();
        if got == want {
            return Ok(());
        }
    }
}

/// Poll `check` until it holds or the wait runs out.
pub async fn eventually<F: Fn() -> bool>(check: F) -> Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("condition not met within {:?}", WAIT)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn session_id_is_read_from_page() {
    let html = r#"<body data-session-id="0123abcd" data-ws-path="/x/ws">"#;
    assert_eq!(session_id_from_page(html).as_deref(), Some("0123abcd"));
    assert_eq!(session_id_from_page("<body>"), None);
}
