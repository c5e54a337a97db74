//! `shardlink run`: serve this node's shards and guilds until interrupted.
//!
//! The node answers inbound requests with the configured handlers, backed
//! by the `[node]` section, and reconnects whenever the server goes away.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use shardlink_client::{ConnectionStatus, IpcClient};
use shardlink_core::{ClusterMember, HandlerRegistry};
use tracing::{info, warn};

use crate::config;

pub async fn run(path: &Path, name: Option<String>) -> Result<()> {
    let file = config::load(path)?;
    let client_config = config::client_config(&file, name)?;
    let member: Arc<dyn ClusterMember> = Arc::new(file.node.member());
    let label = client_config.name.clone().unwrap_or_else(|| "node".into());
    let registry = HandlerRegistry::from_names(&file.ipc.handlers, member.clone(), &label)
        .context("invalid handler list")?;

    info!(
        url = %client_config.url,
        shards = ?member.shard_ids(),
        guilds = member.guild_ids().len(),
        "starting node"
    );
    let client = IpcClient::connect(client_config, registry, member);
    let mut status = client.status_watch();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                match current {
                    ConnectionStatus::Online => info!("online"),
                    ConnectionStatus::Rejected => {
                        warn!("server rejected the shared secret; check [ipc].shared_secret")
                    }
                    other => info!(status = ?other, "connection status"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
