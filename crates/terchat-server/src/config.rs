//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use terchat_shared::constants::{DEFAULT_MAX_SESSIONS, DEFAULT_PORT, MAX_BODY_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address to accept clients on.
    /// Env: `LISTEN_ADDR`
    /// Default: `0.0.0.0:8081`
    pub listen_addr: SocketAddr,

    /// Root of the text-file store (`user_list.txt`, `users/<id>/...`).
    /// Env: `DATA_DIR`
    /// Default: the platform data directory, or `./TerChatApp`.
    pub data_dir: PathBuf,

    /// Maximum number of concurrent sessions. Connections beyond this are
    /// told the server is full and closed.
    /// Env: `MAX_SESSIONS`
    /// Default: `10`
    pub max_sessions: usize,

    /// Close a session after this long without an inbound frame.
    /// Env: `IDLE_TIMEOUT_SECS` (`0` disables)
    /// Default: disabled.
    pub idle_timeout: Option<Duration>,

    /// Largest accepted record body in bytes.
    /// Env: `MAX_BODY_SIZE`
    /// Default: 64 KiB
    pub max_body: usize,

    /// Capacity of each session's outbound queue.
    /// Env: `OUTBOUND_QUEUE`
    /// Default: `64`
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            data_dir: default_data_dir(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_timeout: None,
            max_body: MAX_BODY_SIZE,
            outbound_queue: 64,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Invalid values are
    /// logged and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.listen_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid LISTEN_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATA_DIR") {
            if !path.is_empty() {
                config.data_dir = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("MAX_SESSIONS") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_sessions = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_SESSIONS, using default"),
            }
        }

        if let Some(val) = lookup("IDLE_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(0) => config.idle_timeout = None,
                Ok(secs) => config.idle_timeout = Some(Duration::from_secs(secs)),
                Err(_) => tracing::warn!(value = %val, "Invalid IDLE_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = lookup("MAX_BODY_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 && n <= u32::MAX as usize => config.max_body = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_BODY_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.outbound_queue = n,
                _ => tracing::warn!(value = %val, "Invalid OUTBOUND_QUEUE, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "TerChatApp")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./TerChatApp"))
}
