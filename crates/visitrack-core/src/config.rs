//! Configuration system for visitrack.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $VISITRACK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/visitrack/config.toml
//!   3. ~/.config/visitrack/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisitrackConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub sessions: SessionConfig,
    pub store: StoreConfig,
    pub instance: InstanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the public listener binds to.
    pub bind_addr: String,
    /// Public port: page load, health, persistent connections.
    pub port: u16,
    /// Unlisted path prefix the shared link points at.
    pub secret_path: String,
    /// Loopback-only admin API port.
    pub admin_port: u16,
    /// Take the client address from X-Forwarded-For / X-Real-IP.
    /// Only safe behind a load balancer that sets them.
    pub trust_proxy_headers: bool,
    /// Proxies in front of the instance that append to X-Forwarded-For.
    /// The client address is the entry this many places from the right;
    /// anything further left is client-supplied.
    pub trusted_proxy_hops: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Sessions this instance admits before answering "no room".
    pub max_users_per_instance: usize,
    /// Page loads allowed per client address per window.
    pub rate_limit: u32,
    pub rate_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often the page sends a heartbeat.
    pub heartbeat_interval_secs: u64,
    /// Idle time after which a session is gone.
    pub ttl_secs: u64,
    /// How often the expiry sweeper runs.
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map. Only correct for a single instance.
    Memory,
    /// SQLite file shared by every instance on the host.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Instance identifier. Empty = derive from $INSTANCE_ID / $HOSTNAME.
    pub id: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8800,
            secret_path: "app-x7k9m2n8".to_string(),
            admin_port: 8801,
            trust_proxy_headers: true,
            trusted_proxy_hops: 1,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_users_per_instance: 25,
            rate_limit: 20,
            rate_window_secs: 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            ttl_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: data_dir().join("sessions.db"),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl LimitsConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

impl InstanceConfig {
    /// The configured id, or one derived from the environment.
    pub fn resolve(&self) -> String {
        if !self.id.is_empty() {
            return self.id.clone();
        }
        for var in ["INSTANCE_ID", "HOSTNAME"] {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() {
                    return v.trim().to_string();
                }
            }
        }
        let suffix: [u8; 4] = rand::random();
        format!("instance-{}", hex::encode(suffix))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("visitrack")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("visitrack")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl VisitrackConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            VisitrackConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML document; missing sections fall back to defaults.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("VISITRACK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&VisitrackConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply VISITRACK_* and legacy env var overrides. A VISITRACK_* name
    /// wins over its legacy alias.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("VISITRACK_SERVER__PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = lookup("VISITRACK_SERVER__ADMIN_PORT").and_then(|v| v.parse().ok()) {
            self.server.admin_port = v;
        }
        if let Some(v) = lookup("VISITRACK_SERVER__TRUSTED_PROXY_HOPS").and_then(|v| v.parse().ok()) {
            self.server.trusted_proxy_hops = v;
        }
        if let Some(v) = lookup("VISITRACK_SERVER__SECRET_PATH").or_else(|| lookup("SECRET_PATH")) {
            self.server.secret_path = v.trim_matches('/').to_string();
        }
        if let Some(v) = lookup("VISITRACK_LIMITS__MAX_USERS_PER_INSTANCE")
            .or_else(|| lookup("MAX_USERS_PER_INSTANCE"))
            .and_then(|v| v.parse().ok())
        {
            self.limits.max_users_per_instance = v;
        }
        if let Some(v) = lookup("VISITRACK_LIMITS__RATE_LIMIT").and_then(|v| v.parse().ok()) {
            self.limits.rate_limit = v;
        }
        if let Some(v) = lookup("VISITRACK_SESSIONS__TTL_SECS").and_then(|v| v.parse().ok()) {
            self.sessions.ttl_secs = v;
        }
        if let Some(v) = lookup("VISITRACK_STORE__BACKEND") {
            match v.to_ascii_lowercase().as_str() {
                "memory" => self.store.backend = StoreBackend::Memory,
                "sqlite" => self.store.backend = StoreBackend::Sqlite,
                _ => {}
            }
        }
        if let Some(v) = lookup("VISITRACK_STORE__SQLITE_PATH") {
            self.store.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("VISITRACK_INSTANCE__ID") {
            self.instance.id = v;
        }
    }
}
