//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use swarm_core::chunk::DEFAULT_CHUNK_SIZE;
use swarm_core::liveness::DEFAULT_IDLE_TIMEOUT_SECS;
use tracing::warn;

/// Node configuration. File: ~/.config/chunkswarm/config.toml or /etc/chunkswarm/config.toml.
/// Env overrides: CHUNKSWARM_TRACKER_ADDR, CHUNKSWARM_ADVERTISE_HOST, CHUNKSWARM_CHUNK_SIZE,
/// CHUNKSWARM_IDLE_TIMEOUT_SECS, CHUNKSWARM_FETCH_TIMEOUT_SECS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tracker address: where the tracker binds and where peers connect (default 127.0.0.1:65345).
    #[serde(default = "default_tracker_addr")]
    pub tracker_addr: String,
    /// Host a peer advertises to the swarm (default 127.0.0.1).
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,
    /// Interface the chunk server binds (default 0.0.0.0).
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Chunk server port; 0 picks an ephemeral port.
    #[serde(default)]
    pub listen_port: u16,
    /// Chunk size in bytes. Every peer in a swarm must use the same value.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Tracker idle window before a peer is pinged.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Bound on each availability query and chunk fetch.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_tracker_addr() -> String {
    "127.0.0.1:65345".to_string()
}
fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}
fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}
fn default_fetch_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tracker_addr: default_tracker_addr(),
            advertise_host: default_advertise_host(),
            bind_host: default_bind_host(),
            listen_port: 0,
            chunk_size: default_chunk_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Config {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Replace zero sizes and timeouts with defaults.
    fn sanitized(mut self) -> Self {
        if self.chunk_size == 0 {
            self.chunk_size = default_chunk_size();
        }
        if self.idle_timeout_secs == 0 {
            self.idle_timeout_secs = default_idle_timeout_secs();
        }
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = default_fetch_timeout_secs();
        }
        self
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let c = load_file().unwrap_or_default();
    apply_env(c, |key| std::env::var(key).ok())
}

fn apply_env(mut c: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(s) = var("CHUNKSWARM_TRACKER_ADDR") {
        c.tracker_addr = s;
    }
    if let Some(s) = var("CHUNKSWARM_ADVERTISE_HOST") {
        c.advertise_host = s;
    }
    if let Some(n) = var("CHUNKSWARM_CHUNK_SIZE").and_then(|s| s.parse().ok()) {
        c.chunk_size = n;
    }
    if let Some(n) = var("CHUNKSWARM_IDLE_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
        c.idle_timeout_secs = n;
    }
    if let Some(n) = var("CHUNKSWARM_FETCH_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
        c.fetch_timeout_secs = n;
    }
    c.sanitized()
}

/// User config first, then the system-wide one.
fn config_paths() -> Vec<PathBuf> {
    let user = std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config/chunkswarm/config.toml"));
    user.into_iter()
        .chain(std::iter::once(PathBuf::from("/etc/chunkswarm/config.toml")))
        .collect()
}

/// Only the first existing file is read. A file that cannot be read or parsed is skipped with
/// a warning, and defaults apply.
fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    read_config(&path)
}

fn read_config(path: &Path) -> Option<Config> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring invalid config");
            None
        }
    }
}
