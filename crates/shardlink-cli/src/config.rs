//! Config file handling for the `shardlink` binary.
//!
//! The file format lives in `shardlink_core::config`; this module resolves
//! the path, wraps errors for the terminal and applies CLI overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use shardlink_client::ClientConfig;
use shardlink_core::config::{default_config_path, expand_tilde};
use shardlink_core::token::generate_secret;
use shardlink_core::ConfigFile;

/// `--config` if given, else `~/.shardlink/config.toml`.
pub fn resolve_path(flag: Option<&str>) -> PathBuf {
    flag.map(|p| expand_tilde(Path::new(p)))
        .unwrap_or_else(default_config_path)
}

pub fn load(path: &Path) -> Result<ConfigFile> {
    ConfigFile::load(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Client settings from the file, with an optional display-name override.
pub fn client_config(file: &ConfigFile, name: Option<String>) -> Result<ClientConfig> {
    let mut config = ClientConfig::from_ipc(&file.ipc).context("invalid [ipc] section")?;
    if name.is_some() {
        config.name = name;
    }
    Ok(config)
}

/// A default config carrying a freshly generated secret.
pub fn starter() -> ConfigFile {
    let mut file = ConfigFile::default();
    file.ipc.shared_secret = generate_secret();
    file
}

/// Write `file` to `path`, creating parent directories.
pub fn save(path: &Path, file: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = file.to_toml()?;
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}
