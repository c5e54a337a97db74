//! The cluster-member collaborator.
//!
//! A process taking part in shardlink owns some shards and guilds of the
//! bot. The protocol core never looks at bot internals directly; it asks a
//! [`ClusterMember`] that the embedding application passes in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Public view of one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSummary {
    pub id: u64,
    pub name: String,
    pub member_count: u64,
}

/// Live status of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStatus {
    pub id: u64,
    /// Gateway heartbeat latency in milliseconds.
    #[serde(default)]
    pub latency: u64,
    #[serde(default)]
    pub ws_ratelimited: bool,
    #[serde(default)]
    pub closed: bool,
}

impl ShardStatus {
    /// An open, healthy shard with the given latency.
    pub fn healthy(id: u64, latency: u64) -> Self {
        Self {
            id,
            latency,
            ws_ratelimited: false,
            closed: false,
        }
    }
}

/// Runtime facts a process exposes about the part of the cluster it owns.
pub trait ClusterMember: Send + Sync + 'static {
    /// Shard ids owned by this process.
    fn shard_ids(&self) -> Vec<u64>;

    /// Guild ids owned by this process.
    fn guild_ids(&self) -> Vec<u64>;

    /// Look up a guild owned by this process.
    fn guild(&self, guild_id: u64) -> Option<GuildSummary>;

    /// Status of every shard owned by this process.
    fn shard_statuses(&self) -> Vec<ShardStatus>;

    /// Ids of the owned guilds that contain `user_id`.
    fn guilds_with_member(&self, user_id: u64) -> Vec<u64>;
}

/// A guild entry for [`StaticMember`], members included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRecord {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub member_count: u64,
    /// User ids present in the guild.
    #[serde(default)]
    pub members: Vec<u64>,
}

impl GuildRecord {
    pub fn new(id: u64, name: impl Into<String>, member_count: u64) -> Self {
        Self {
            id,
            name: Some(name.into()),
            member_count,
            members: Vec::new(),
        }
    }

    pub fn with_members(mut self, members: impl IntoIterator<Item = u64>) -> Self {
        self.members = members.into_iter().collect();
        self
    }

    fn summary(&self) -> GuildSummary {
        GuildSummary {
            id: self.id,
            name: self
                .name
                .clone()
                .unwrap_or_else(|| format!("Guild {}", self.id)),
            member_count: self.member_count,
        }
    }
}

/// A fixed, in-memory [`ClusterMember`].
///
/// Backs the `[node]` config section and the tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMember {
    shards: BTreeMap<u64, ShardStatus>,
    guilds: BTreeMap<u64, GuildRecord>,
}

impl StaticMember {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config records.
    pub fn from_records(
        shards: impl IntoIterator<Item = ShardStatus>,
        guilds: impl IntoIterator<Item = GuildRecord>,
    ) -> Self {
        let mut member = Self::new();
        for shard in shards {
            member = member.with_shard(shard);
        }
        for guild in guilds {
            member = member.with_guild(guild);
        }
        member
    }

    pub fn with_shard(mut self, status: ShardStatus) -> Self {
        self.shards.insert(status.id, status);
        self
    }

    pub fn with_guild(mut self, guild: GuildRecord) -> Self {
        self.guilds.insert(guild.id, guild);
        self
    }
}

impl ClusterMember for StaticMember {
    fn shard_ids(&self) -> Vec<u64> {
        self.shards.keys().copied().collect()
    }

    fn guild_ids(&self) -> Vec<u64> {
        self.guilds.keys().copied().collect()
    }

    fn guild(&self, guild_id: u64) -> Option<GuildSummary> {
        self.guilds.get(&guild_id).map(GuildRecord::summary)
    }

    fn shard_statuses(&self) -> Vec<ShardStatus> {
        self.shards.values().cloned().collect()
    }

    fn guilds_with_member(&self, user_id: u64) -> Vec<u64> {
        self.guilds
            .values()
            .filter(|g| g.members.contains(&user_id))
            .map(|g| g.id)
            .collect()
    }
}
