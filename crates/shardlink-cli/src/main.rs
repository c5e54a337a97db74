//! shardlink: command-line client for a shardlink cluster.
//!
//! Runs a client node described by the config file, sends one-off queries
//! through the server, and creates or checks the config file.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing::error;

/// shardlink: cluster IPC client
#[derive(Parser)]
#[command(name = "shardlink", version, about = "shardlink client: run a node or query the cluster")]
struct Cli {
    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and serve this node's shards and guilds until interrupted
    Run {
        /// Display name (overrides `name`)
        #[arg(long)]
        name: Option<String>,
    },

    /// Send one request through the server and print the reply
    Query {
        /// Handler name, e.g. guild_info
        handler: String,
        /// Arguments as JSON; a bare word is sent as a string
        args: Option<String>,
        /// Seconds to wait for login and reply
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    /// Write a config file with a fresh shared secret
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the config file and print the effective settings
    CheckConfig,

    /// Print a freshly generated shared secret
    Secret,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let default_filter = if cli.verbose {
        "shardlink=debug,shardlink_cli=debug,shardlink_client=debug,shardlink_core=debug"
    } else {
        "shardlink=info,shardlink_cli=info,shardlink_client=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(cli.verbose)
        .init();

    let path = config::resolve_path(cli.config.as_deref());

    let result = match cli.command {
        Command::Run { name } => commands::run::run(&path, name).await,
        Command::Query {
            handler,
            args,
            timeout,
        } => commands::query::run(&path, &handler, args.as_deref(), timeout).await,
        Command::Init { force } => commands::init::run(&path, force),
        Command::CheckConfig => commands::check::run(&path),
        Command::Secret => {
            println!("{}", shardlink_core::token::generate_secret());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("shardlink: {e:#}");
        std::process::exit(1);
    }
}
