//! shardlink-server: rendezvous server for a shardlink cluster.
//!
//! Accepts WebSocket connections from shardlink clients, authenticates them
//! with the shared secret, and routes requests between them.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use shardlink_core::config::{default_config_path, expand_tilde};
use shardlink_core::{ClusterMember, HandlerRegistry};
use shardlink_server::{IpcServer, ServerConfig};

/// shardlink-server: shardlink rendezvous server
#[derive(Parser, Debug)]
#[command(name = "shardlink-server", version, about = "shardlink rendezvous server")]
struct Cli {
    /// Listen host (overrides `listen_host`)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides `listen_port`)
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file path
    #[arg(long)]
    config: Option<String>,

    /// Shared secret (overrides `shared_secret`; prefer the config file)
    #[arg(long)]
    secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting shardlink-server");

    let config_path = cli
        .config
        .as_deref()
        .map(|p| expand_tilde(&PathBuf::from(p)))
        .unwrap_or_else(default_config_path);

    let (server_config, file) = match ServerConfig::load(
        &config_path,
        cli.host.as_deref(),
        cli.port,
        cli.secret.as_deref(),
    ) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let member: Arc<dyn ClusterMember> = Arc::new(file.node.member());
    let registry =
        match HandlerRegistry::from_names(&file.ipc.handlers, member.clone(), &server_config.name) {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "failed to build handler registry");
                std::process::exit(1);
            }
        };

    let server = match IpcServer::start(server_config, registry, member).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    shutdown_signal().await;
    info!("received shutdown signal");
    server.shutdown().await;

    info!("shardlink-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
