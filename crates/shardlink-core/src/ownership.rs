//! Ownership maps: which process answers for a shard or a guild.
//!
//! The server keeps one map per resource kind. Claims are made at login and
//! are last-write-wins; a disconnecting connection releases only the entries
//! that still point at it.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info};

/// Who answers for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    /// The server process itself.
    Local,
    /// A connected client, by connection id.
    Remote(u64),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Local => write!(f, "local"),
            Owner::Remote(id) => write!(f, "conn-{id}"),
        }
    }
}

/// Shard and guild ownership.
#[derive(Debug, Clone, Default)]
pub struct OwnershipMap {
    shards: HashMap<u64, Owner>,
    guilds: HashMap<u64, Owner>,
}

impl OwnershipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `owner` as responsible for the given ids, replacing any
    /// previous claim.
    pub fn claim(&mut self, owner: Owner, shards: &[u64], guilds: &[u64]) {
        for &shard in shards {
            if let Some(previous) = self.shards.insert(shard, owner) {
                if previous != owner {
                    debug!(shard, %previous, %owner, "shard claim overwritten");
                }
            }
        }
        for &guild in guilds {
            if let Some(previous) = self.guilds.insert(guild, owner) {
                if previous != owner {
                    debug!(guild, %previous, %owner, "guild claim overwritten");
                }
            }
        }
        info!(%owner, shards = shards.len(), guilds = guilds.len(), "ownership claimed");
    }

    /// Drop every entry still owned by connection `conn_id`.
    ///
    /// Returns `(shards_removed, guilds_removed)`.
    pub fn release(&mut self, conn_id: u64) -> (usize, usize) {
        let owner = Owner::Remote(conn_id);
        let shards_before = self.shards.len();
        let guilds_before = self.guilds.len();
        self.shards.retain(|_, o| *o != owner);
        self.guilds.retain(|_, o| *o != owner);
        let removed = (
            shards_before - self.shards.len(),
            guilds_before - self.guilds.len(),
        );
        if removed != (0, 0) {
            debug!(%owner, shards = removed.0, guilds = removed.1, "ownership released");
        }
        removed
    }

    pub fn shard_owner(&self, shard_id: u64) -> Option<Owner> {
        self.shards.get(&shard_id).copied()
    }

    pub fn guild_owner(&self, guild_id: u64) -> Option<Owner> {
        self.guilds.get(&guild_id).copied()
    }

    /// Shard ids currently owned by `owner`, sorted.
    pub fn shards_of(&self, owner: Owner) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .shards
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Guild ids currently owned by `owner`, sorted.
    pub fn guilds_of(&self, owner: Owner) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .guilds
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }
}
