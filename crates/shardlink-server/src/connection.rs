//! Per-socket connection records.

use std::net::SocketAddr;

use serde::Serialize;
use tokio::sync::mpsc;

use shardlink_core::{Envelope, Owner, OwnershipMap};

/// Outbound mailbox size per connection.
pub(crate) const MAILBOX_CAPACITY: usize = 64;

/// Live state of one accepted socket.
pub(crate) struct ConnectionState {
    pub id: u64,
    pub remote: SocketAddr,
    pub name: String,
    pub authenticated: bool,
    /// Mailbox drained by the connection's socket actor.
    pub tx: mpsc::Sender<Envelope>,
}

impl ConnectionState {
    pub fn new(id: u64, remote: SocketAddr, tx: mpsc::Sender<Envelope>) -> Self {
        Self {
            id,
            remote,
            name: format!("conn-{id}"),
            authenticated: false,
            tx,
        }
    }

    /// Snapshot, with the ids this connection still owns in `owners`.
    pub fn info(&self, owners: &OwnershipMap) -> ConnectionInfo {
        let owner = Owner::Remote(self.id);
        ConnectionInfo {
            id: self.id,
            remote: self.remote.to_string(),
            name: self.name.clone(),
            authenticated: self.authenticated,
            shards: owners.shards_of(owner),
            guilds: owners.guilds_of(owner),
        }
    }
}

/// Snapshot of a connection for introspection.
///
/// `shards` and `guilds` are the ids it currently owns; a later login that
/// claims the same id takes it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub remote: String,
    pub name: String,
    pub authenticated: bool,
    pub shards: Vec<u64>,
    pub guilds: Vec<u64>,
}
