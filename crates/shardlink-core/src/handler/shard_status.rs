//! `shard_status`: every process reports its shards, the server merges them.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{merge_objects, BroadcastHandler, BroadcastReply, RequestHandler};
use crate::error::ShardLinkResult;
use crate::member::ClusterMember;

pub const SHARD_STATUS: &str = "shard_status";

pub struct ShardStatusHandler {
    member: Arc<dyn ClusterMember>,
}

impl ShardStatusHandler {
    pub fn new(member: Arc<dyn ClusterMember>) -> Self {
        Self { member }
    }
}

#[async_trait]
impl RequestHandler for ShardStatusHandler {
    fn name(&self) -> &str {
        SHARD_STATUS
    }

    fn build_request(&self, _args: Value) -> ShardLinkResult<Value> {
        Ok(json!({}))
    }

    async fn answer(&self, _data: Value) -> Option<Value> {
        let mut statuses = Map::new();
        for shard in self.member.shard_statuses() {
            statuses.insert(
                shard.id.to_string(),
                json!({
                    "latency": shard.latency,
                    "ws_ratelimited": shard.ws_ratelimited,
                    "closed": shard.closed,
                }),
            );
        }
        Some(Value::Object(statuses))
    }
}

impl BroadcastHandler for ShardStatusHandler {
    fn aggregate(&self, replies: Vec<BroadcastReply>) -> Value {
        merge_objects(replies)
    }
}
