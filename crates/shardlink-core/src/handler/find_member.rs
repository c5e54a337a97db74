//! `find_member`: which guilds across the cluster contain a user.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{concat_arrays, id_arg, BroadcastHandler, BroadcastReply, RequestHandler};
use crate::error::ShardLinkResult;
use crate::member::ClusterMember;

pub const FIND_MEMBER: &str = "find_member";

pub struct FindMemberHandler {
    member: Arc<dyn ClusterMember>,
}

impl FindMemberHandler {
    pub fn new(member: Arc<dyn ClusterMember>) -> Self {
        Self { member }
    }
}

#[async_trait]
impl RequestHandler for FindMemberHandler {
    fn name(&self) -> &str {
        FIND_MEMBER
    }

    fn build_request(&self, args: Value) -> ShardLinkResult<Value> {
        Ok(json!({ "user_id": id_arg(&args, "user_id")? }))
    }

    async fn answer(&self, data: Value) -> Option<Value> {
        let guilds = match data.get("user_id").and_then(Value::as_u64) {
            Some(user_id) => self.member.guilds_with_member(user_id),
            None => Vec::new(),
        };
        Some(json!(guilds))
    }
}

impl BroadcastHandler for FindMemberHandler {
    fn aggregate(&self, replies: Vec<BroadcastReply>) -> Value {
        concat_arrays(replies)
    }
}
