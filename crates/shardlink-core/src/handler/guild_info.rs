//! `guild_info`: look up one guild on the process that owns it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{id_arg, PointToPointHandler, RequestHandler};
use crate::error::ShardLinkResult;
use crate::member::ClusterMember;
use crate::ownership::{Owner, OwnershipMap};

pub const GUILD_INFO: &str = "guild_info";

pub struct GuildInfoHandler {
    member: Arc<dyn ClusterMember>,
}

impl GuildInfoHandler {
    pub fn new(member: Arc<dyn ClusterMember>) -> Self {
        Self { member }
    }
}

fn not_found() -> Value {
    json!({ "success": false, "message": "Guild not found" })
}

#[async_trait]
impl RequestHandler for GuildInfoHandler {
    fn name(&self) -> &str {
        GUILD_INFO
    }

    fn build_request(&self, args: Value) -> ShardLinkResult<Value> {
        Ok(json!({ "guild_id": id_arg(&args, "guild_id")? }))
    }

    async fn answer(&self, data: Value) -> Option<Value> {
        let guild = data
            .get("guild_id")
            .and_then(Value::as_u64)
            .and_then(|id| self.member.guild(id));
        Some(match guild {
            Some(guild) => json!({ "success": true, "guild": guild }),
            None => not_found(),
        })
    }
}

impl PointToPointHandler for GuildInfoHandler {
    fn route(&self, owners: &OwnershipMap, data: &Value) -> Option<Owner> {
        let guild_id = data.get("guild_id")?.as_u64()?;
        owners.guild_owner(guild_id)
    }

    fn unrouted(&self, _data: &Value) -> Option<Value> {
        Some(not_found())
    }
}
