//! Server configuration: TOML file + CLI overrides.

use std::path::Path;
use std::time::Duration;

use shardlink_core::config::{ConfigFile, IpcSection};
use shardlink_core::ShardLinkResult;

/// Name the server answers to when none is configured.
pub const DEFAULT_SERVER_NAME: &str = "server";

/// Resolved server configuration (CLI overrides applied).
#[derive(Clone)]
pub struct ServerConfig {
    /// `host:port` to bind. Port 0 picks a free port.
    pub listen_addr: String,
    pub shared_secret: String,
    /// Display name of the server process itself.
    pub name: String,
    /// Bound on server-originated calls (`None` waits forever).
    pub request_timeout: Option<Duration>,
}

impl ServerConfig {
    pub fn new(listen_addr: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            shared_secret: shared_secret.into(),
            name: DEFAULT_SERVER_NAME.to_string(),
            request_timeout: None,
        }
    }

    /// Build from the `[ipc]` section, refusing an unusable secret.
    pub fn from_ipc(ipc: &IpcSection) -> ShardLinkResult<Self> {
        ipc.validate_secret()?;
        Ok(Self {
            listen_addr: ipc.listen_addr(),
            shared_secret: ipc.shared_secret.clone(),
            name: ipc
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string()),
            request_timeout: ipc.request_timeout(),
        })
    }

    /// Load the config file, then apply CLI overrides.
    ///
    /// The parsed file is returned too so the caller can build the handler
    /// registry and the `[node]` member from it.
    pub fn load(
        config_path: &Path,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
        cli_secret: Option<&str>,
    ) -> ShardLinkResult<(Self, ConfigFile)> {
        let mut file = ConfigFile::load(config_path)?;

        if let Some(host) = cli_host {
            file.ipc.listen_host = host.to_string();
        }
        if let Some(port) = cli_port {
            file.ipc.listen_port = port;
        }
        if let Some(secret) = cli_secret {
            file.ipc.shared_secret = secret.to_string();
        }

        let config = Self::from_ipc(&file.ipc)?;
        Ok((config, file))
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("name", &self.name)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
