//! `shardlink query <handler> [args]`: one request, printed as JSON.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use shardlink_client::IpcClient;
use shardlink_core::{ClusterMember, HandlerRegistry, StaticMember};
use tracing::debug;

use crate::config;

pub async fn run(path: &Path, handler: &str, raw_args: Option<&str>, timeout: u64) -> Result<()> {
    let file = config::load(path)?;
    let client_config = config::client_config(&file, None)?;

    // A query connection owns nothing, so it never becomes a routing target.
    let member: Arc<dyn ClusterMember> = Arc::new(StaticMember::new());
    let registry = HandlerRegistry::from_names(&file.ipc.handlers, member.clone(), "query")
        .context("invalid handler list")?;
    if !registry.contains(handler) {
        return Err(anyhow!(
            "handler `{handler}` is not enabled (enabled: {})",
            registry.names().collect::<Vec<_>>().join(", ")
        ));
    }

    let args = parse_args(raw_args);
    debug!(handler, args = %args, "query");

    let client = IpcClient::connect(client_config, registry, member);
    let outcome = tokio::time::timeout(Duration::from_secs(timeout), async {
        match client.wait_online().await {
            Ok(()) => client.send_request(handler, args).await,
            Err(e) => Err(e),
        }
    })
    .await;
    client.shutdown().await;

    let reply = outcome
        .map_err(|_| anyhow!("no reply within {timeout}s"))?
        .with_context(|| format!("`{handler}` request failed"))?;
    match reply {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("sent"),
    }
    Ok(())
}

/// JSON if it parses, else the raw text as a string; `{}` when absent.
fn parse_args(raw: Option<&str>) -> Value {
    match raw {
        None => Value::Object(Default::default()),
        Some(raw) => {
            serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        }
    }
}
