//! Pluggable request handlers.
//!
//! A handler implements one named operation of the protocol. It is one of a
//! closed set of variants:
//!
//! - [`Handler::Login`]: the built-in authentication handshake, answered only
//!   by the server.
//! - [`Handler::PointToPoint`]: answered by the single peer that owns the
//!   target resource.
//! - [`Handler::Broadcast`]: answered by every peer, then merged by the
//!   server into one reply.
//!
//! `build_request` runs on the asking side, `answer` on the answering side(s),
//! and `route` / `targets` / `aggregate` on the server.

pub mod find_member;
pub mod guild_info;
pub mod login;
pub mod ping;
pub mod registry;
pub mod shard_status;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ShardLinkError, ShardLinkResult};
use crate::ownership::{Owner, OwnershipMap};

pub use login::{LoginRequest, LoginResponse, LOGIN_HANDLER};
pub use registry::{HandlerRegistry, RegistryBuilder};

/// Surface shared by every handler variant.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Wire name of the handler.
    fn name(&self) -> &str;

    /// Whether the asker expects a reply.
    fn wait(&self) -> bool {
        true
    }

    /// Whether the server answers itself instead of forwarding.
    fn server_reply(&self) -> bool {
        false
    }

    /// Turn caller arguments into the request payload.
    fn build_request(&self, args: Value) -> ShardLinkResult<Value> {
        Ok(args)
    }

    /// Answer a request locally. `None` means no reply is sent.
    async fn answer(&self, data: Value) -> Option<Value>;
}

/// A handler answered by exactly one peer.
pub trait PointToPointHandler: RequestHandler {
    /// Decide who must answer `data`.
    fn route(&self, owners: &OwnershipMap, data: &Value) -> Option<Owner>;

    /// Reply to send when [`route`](Self::route) finds nobody.
    fn unrouted(&self, _data: &Value) -> Option<Value> {
        None
    }
}

/// A peer taking part in a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub owner: Owner,
    pub name: String,
}

/// One peer's answer to a broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastReply {
    pub peer: Peer,
    pub data: Value,
}

/// A handler answered by every peer and merged by the server.
pub trait BroadcastHandler: RequestHandler {
    /// Peers that must answer. Defaults to everyone.
    fn targets(&self, peers: &[Peer], _data: &Value) -> Vec<Peer> {
        peers.to_vec()
    }

    /// Merge the replies of every target into the final payload.
    ///
    /// Replies arrive with the server first, then by connection id.
    fn aggregate(&self, replies: Vec<BroadcastReply>) -> Value;
}

/// A registered handler.
#[derive(Clone)]
pub enum Handler {
    Login,
    PointToPoint(Arc<dyn PointToPointHandler>),
    Broadcast(Arc<dyn BroadcastHandler>),
}

impl Handler {
    pub fn point_to_point(handler: impl PointToPointHandler) -> Self {
        Handler::PointToPoint(Arc::new(handler))
    }

    pub fn broadcast(handler: impl BroadcastHandler) -> Self {
        Handler::Broadcast(Arc::new(handler))
    }

    pub fn name(&self) -> &str {
        match self {
            Handler::Login => LOGIN_HANDLER,
            Handler::PointToPoint(h) => h.name(),
            Handler::Broadcast(h) => h.name(),
        }
    }

    pub fn wait(&self) -> bool {
        match self {
            Handler::Login => true,
            Handler::PointToPoint(h) => h.wait(),
            Handler::Broadcast(h) => h.wait(),
        }
    }

    pub fn server_reply(&self) -> bool {
        match self {
            Handler::Login => true,
            Handler::PointToPoint(h) => h.server_reply(),
            Handler::Broadcast(h) => h.server_reply(),
        }
    }

    pub fn build_request(&self, args: Value) -> ShardLinkResult<Value> {
        match self {
            Handler::Login => Ok(args),
            Handler::PointToPoint(h) => h.build_request(args),
            Handler::Broadcast(h) => h.build_request(args),
        }
    }

    /// Answer a request locally. Login requests are never answered here.
    pub async fn answer(&self, data: Value) -> Option<Value> {
        match self {
            Handler::Login => None,
            Handler::PointToPoint(h) => h.answer(data).await,
            Handler::Broadcast(h) => h.answer(data).await,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            Handler::Login => "Login",
            Handler::PointToPoint(_) => "PointToPoint",
            Handler::Broadcast(_) => "Broadcast",
        };
        f.debug_struct("Handler")
            .field("variant", &variant)
            .field("name", &self.name())
            .finish()
    }
}

/// Merge object-shaped replies key by key. Non-object replies are skipped.
pub fn merge_objects(replies: Vec<BroadcastReply>) -> Value {
    let mut merged = Map::new();
    for reply in replies {
        match reply.data {
            Value::Object(obj) => merged.extend(obj),
            other => debug!(peer = %reply.peer.name, reply = %other, "skipping non-object reply"),
        }
    }
    Value::Object(merged)
}

/// Concatenate array-shaped replies in reply order. Non-array replies are skipped.
pub fn concat_arrays(replies: Vec<BroadcastReply>) -> Value {
    let mut items = Vec::new();
    for reply in replies {
        match reply.data {
            Value::Array(list) => items.extend(list),
            other => debug!(peer = %reply.peer.name, reply = %other, "skipping non-array reply"),
        }
    }
    Value::Array(items)
}

/// Read an id argument given either bare (`10`) or keyed (`{"guild_id": 10}`).
pub(crate) fn id_arg(args: &Value, key: &str) -> ShardLinkResult<u64> {
    let value = match args {
        Value::Object(obj) => obj.get(key).unwrap_or(&Value::Null),
        other => other,
    };
    value
        .as_u64()
        .ok_or_else(|| ShardLinkError::InvalidMessage(format!("expected a numeric `{key}`")))
}
