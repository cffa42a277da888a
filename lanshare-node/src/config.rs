//! Load config from file and environment.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lanshare_core::{DEFAULT_CHUNK_SIZE, DEFAULT_DISCOVERY_PORT, DEFAULT_TRANSFER_PORT};
use serde::Deserialize;
use tracing::{debug, warn};

/// Node configuration. File: ~/.config/lanshare/config.toml or /etc/lanshare/config.toml.
/// Env overrides: LANSHARE_DISCOVERY_PORT, LANSHARE_TRANSFER_PORT, LANSHARE_BROADCAST_ADDR,
/// LANSHARE_DOWNLOAD_DIR, LANSHARE_CHUNK_SIZE, LANSHARE_CONNECT_TIMEOUT_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 9999).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Transfer TCP port (default 8888).
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    /// Where discovery probes are sent (default limited broadcast).
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: Ipv4Addr,
    /// Incoming files are saved here (default: home directory).
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Outbound chunk size in bytes (default 4096; 0 means default).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Outbound connect timeout (default 3000 ms).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_transfer_port() -> u16 {
    DEFAULT_TRANSFER_PORT
}
fn default_broadcast_addr() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}
fn default_download_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_connect_timeout_ms() -> u64 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transfer_port: default_transfer_port(),
            broadcast_addr: default_broadcast_addr(),
            download_dir: default_download_dir(),
            chunk_size: default_chunk_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Config {
    pub fn chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |name| std::env::var(name).ok());
    c
}

/// Apply `LANSHARE_*` overrides. `lookup` returns the raw value of a variable, if set.
pub fn apply_env(c: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    override_from(&lookup, "LANSHARE_DISCOVERY_PORT", &mut c.discovery_port);
    override_from(&lookup, "LANSHARE_TRANSFER_PORT", &mut c.transfer_port);
    override_from(&lookup, "LANSHARE_BROADCAST_ADDR", &mut c.broadcast_addr);
    override_from(&lookup, "LANSHARE_DOWNLOAD_DIR", &mut c.download_dir);
    override_from(&lookup, "LANSHARE_CHUNK_SIZE", &mut c.chunk_size);
    override_from(&lookup, "LANSHARE_CONNECT_TIMEOUT_MS", &mut c.connect_timeout_ms);
}

fn override_from<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut T) {
    if let Some(s) = lookup(name) {
        match s.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => warn!(var = name, value = %s, "ignoring unparseable override"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lanshare/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanshare/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => {
                        debug!(path = %p.display(), "loaded config");
                        return Some(c);
                    }
                    Err(e) => warn!(path = %p.display(), error = %e, "invalid config file, using defaults"),
                },
                Err(e) => warn!(path = %p.display(), error = %e, "cannot read config file"),
            }
            break;
        }
    }
    None
}
