//! `shardlink init`: write a starter config file.

use std::path::Path;

use anyhow::{bail, Result};
use tracing::info;

use crate::config;

pub fn run(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::save(path, &config::starter())?;
    info!(path = %path.display(), "config written");
    println!("Wrote {}", path.display());
    println!("Copy its shared_secret to every node in the cluster.");
    Ok(())
}
