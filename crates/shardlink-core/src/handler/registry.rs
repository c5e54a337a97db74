//! Name-keyed handler registry, built once and immutable afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::find_member::{FindMemberHandler, FIND_MEMBER};
use super::guild_info::{GuildInfoHandler, GUILD_INFO};
use super::ping::{PingHandler, PING};
use super::shard_status::{ShardStatusHandler, SHARD_STATUS};
use super::{Handler, LOGIN_HANDLER};
use crate::error::{ShardLinkError, ShardLinkResult};
use crate::member::ClusterMember;

/// Names of every handler that can be enabled from configuration.
pub const BUILTIN_HANDLERS: &[&str] = &[GUILD_INFO, SHARD_STATUS, FIND_MEMBER, PING];

/// Immutable `name → Handler` table. Always contains `login`.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Handler>>,
    order: Arc<Vec<String>>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Build a registry from configured built-in names.
    ///
    /// `server_name` is what `ping` reports.
    pub fn from_names<S: AsRef<str>>(
        names: &[S],
        member: Arc<dyn ClusterMember>,
        server_name: &str,
    ) -> ShardLinkResult<Self> {
        let mut builder = Self::builder();
        for name in names {
            let name = name.as_ref();
            let handler = builtin(name, member.clone(), server_name).ok_or_else(|| {
                ShardLinkError::Config(format!(
                    "unknown handler `{name}` (available: {})",
                    BUILTIN_HANDLERS.join(", ")
                ))
            })?;
            builder = builder.register(handler)?;
        }
        Ok(builder.build())
    }

    /// Look up a handler by wire name.
    pub fn get(&self, name: &str) -> ShardLinkResult<&Handler> {
        self.handlers
            .get(name)
            .ok_or_else(|| ShardLinkError::UnknownHandler(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Handler names in registration order, `login` first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Accumulates handlers before freezing them into a [`HandlerRegistry`].
#[derive(Debug)]
pub struct RegistryBuilder {
    handlers: HashMap<String, Handler>,
    order: Vec<String>,
}

impl RegistryBuilder {
    fn new() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(LOGIN_HANDLER.to_string(), Handler::Login);
        Self {
            handlers,
            order: vec![LOGIN_HANDLER.to_string()],
        }
    }

    /// Add a handler. Empty and already-taken names are rejected.
    pub fn register(mut self, handler: Handler) -> ShardLinkResult<Self> {
        let name = handler.name().to_string();
        if name.is_empty() {
            return Err(ShardLinkError::Config("handler name is empty".into()));
        }
        if self.handlers.contains_key(&name) {
            return Err(ShardLinkError::DuplicateHandler(name));
        }
        debug!(handler = %name, ?handler, "registered handler");
        self.order.push(name.clone());
        self.handlers.insert(name, handler);
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
            order: Arc::new(self.order),
        }
    }
}

fn builtin(name: &str, member: Arc<dyn ClusterMember>, server_name: &str) -> Option<Handler> {
    let handler = match name {
        GUILD_INFO => Handler::point_to_point(GuildInfoHandler::new(member)),
        SHARD_STATUS => Handler::broadcast(ShardStatusHandler::new(member)),
        FIND_MEMBER => Handler::broadcast(FindMemberHandler::new(member)),
        PING => Handler::point_to_point(PingHandler::new(server_name)),
        _ => return None,
    };
    Some(handler)
}
