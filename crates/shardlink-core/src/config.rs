//! Shared configuration file at `~/.shardlink/config.toml`.
//!
//! The `[ipc]` section drives both endpoints; `[node]` describes the shards
//! and guilds this process owns when no live bot is attached. CLI flags in
//! the binaries override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ShardLinkError, ShardLinkResult};
use crate::member::{GuildRecord, ShardStatus, StaticMember};

/// Secret shipped in generated configs. Refused at startup.
pub const PLACEHOLDER_SECRET: &str = "change-me";

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub ipc: IpcSection,
    #[serde(default)]
    pub node: NodeSection,
}

/// `[ipc]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcSection {
    #[serde(default = "default_secret")]
    pub shared_secret: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_handlers")]
    pub handlers: Vec<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// 0 waits forever.
    #[serde(default)]
    pub request_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Default for IpcSection {
    fn default() -> Self {
        Self {
            shared_secret: default_secret(),
            server_url: default_server_url(),
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            handlers: default_handlers(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_timeout_secs: 0,
            name: None,
        }
    }
}

/// `[node]` section: static stand-in for the bot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSection {
    #[serde(default)]
    pub shards: Vec<ShardStatus>,
    #[serde(default)]
    pub guilds: Vec<GuildRecord>,
}

fn default_secret() -> String {
    PLACEHOLDER_SECRET.to_string()
}
fn default_server_url() -> String {
    "http://127.0.0.1:12321".to_string()
}
fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    12321
}
fn default_handlers() -> Vec<String> {
    crate::handler::registry::BUILTIN_HANDLERS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}

impl ConfigFile {
    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> ShardLinkResult<Self> {
        let expanded = expand_tilde(path);
        if !expanded.exists() {
            info!(path = %expanded.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        info!(path = %expanded.display(), "loading config file");
        let content = std::fs::read_to_string(&expanded)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ShardLinkResult<Self> {
        toml::from_str(content).map_err(|e| ShardLinkError::Config(format!("config parse error: {e}")))
    }

    pub fn to_toml(&self) -> ShardLinkResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ShardLinkError::Config(format!("config serialize error: {e}")))
    }
}

impl IpcSection {
    /// Refuse an empty or placeholder shared secret.
    pub fn validate_secret(&self) -> ShardLinkResult<()> {
        if self.shared_secret.trim().is_empty() {
            return Err(ShardLinkError::Config("shared_secret is empty".into()));
        }
        if self.shared_secret == PLACEHOLDER_SECRET {
            return Err(ShardLinkError::Config(
                "shared_secret is still the placeholder; run `shardlink secret` to generate one"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Per-call timeout, `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// The WebSocket endpoint derived from `server_url`.
    pub fn ws_url(&self) -> ShardLinkResult<String> {
        normalize_ws_url(&self.server_url)
    }

    /// `listen_host:listen_port`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

impl NodeSection {
    pub fn member(&self) -> StaticMember {
        StaticMember::from_records(self.shards.iter().cloned(), self.guilds.iter().cloned())
    }
}

/// Map an `http(s)`/`ws(s)` server URL to its `/ws` endpoint.
pub fn normalize_ws_url(url: &str) -> ShardLinkResult<String> {
    let url = url.trim();
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| ShardLinkError::Config(format!("server_url `{url}` has no scheme")))?;
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ShardLinkError::Config(format!(
                "unsupported server_url scheme `{other}`"
            )))
        }
    };
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(ShardLinkError::Config(format!("server_url `{url}` has no host")));
    }
    if rest.ends_with("/ws") {
        Ok(format!("{scheme}://{rest}"))
    } else {
        Ok(format!("{scheme}://{rest}/ws"))
    }
}

/// Default config location, `~/.shardlink/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shardlink")
        .join("config.toml")
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(stripped) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}
