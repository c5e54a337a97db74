//! `shardlink check-config`: validate the file and show what it resolves to.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use shardlink_core::{ClusterMember, ConfigFile, HandlerRegistry};

use crate::config;

pub fn run(path: &Path) -> Result<()> {
    let file = config::load(path)?;
    for line in summarize(&file)? {
        println!("{line}");
    }
    Ok(())
}

/// Validate `file` and describe the effective settings.
pub fn summarize(file: &ConfigFile) -> Result<Vec<String>> {
    let client = config::client_config(file, None)?;
    let member: Arc<dyn ClusterMember> = Arc::new(file.node.member());
    let registry = HandlerRegistry::from_names(&file.ipc.handlers, member.clone(), "check")
        .context("invalid handler list")?;

    let handlers: Vec<&str> = registry.names().collect();
    let timeout = match client.request_timeout {
        Some(t) => format!("{}s", t.as_secs()),
        None => "none".to_string(),
    };
    Ok(vec![
        format!("server:    {}", client.url),
        format!("listen:    {}", file.ipc.listen_addr()),
        format!("name:      {}", client.name.as_deref().unwrap_or("(assigned by server)")),
        format!("handlers:  {}", handlers.join(", ")),
        format!("timeout:   {timeout}"),
        format!("shards:    {:?}", member.shard_ids()),
        format!("guilds:    {:?}", member.guild_ids()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_effective_values() {
        let file = ConfigFile::parse(
            r#"
            [ipc]
            shared_secret = "s3cret"
            server_url = "https://hub.example:8443"
            handlers = ["ping"]
            request_timeout_secs = 5

            [node]
            shards = [{ id = 1, latency = 201 }]
            guilds = [{ id = 10, name = "Guild 10", member_count = 1210 }]
            "#,
        )
        .unwrap();

        let lines = summarize(&file).unwrap();
        assert_eq!(lines[0], "server:    wss://hub.example:8443/ws");
        assert!(lines[3].contains("login") && lines[3].contains("ping"));
        assert_eq!(lines[4], "timeout:   5s");
        assert_eq!(lines[5], "shards:    [1]");
        assert_eq!(lines[6], "guilds:    [10]");
    }

    #[test]
    fn unknown_handler_is_reported() {
        let file = ConfigFile::parse(
            "[ipc]\nshared_secret = \"x\"\nhandlers = [\"teleport\"]\n",
        )
        .unwrap();
        let err = summarize(&file).unwrap_err();
        assert!(format!("{err:#}").contains("teleport"));
    }
}
