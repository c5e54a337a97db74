//! `ping`: answered by the server itself, never forwarded.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{PointToPointHandler, RequestHandler};
use crate::error::ShardLinkResult;
use crate::ownership::{Owner, OwnershipMap};

pub const PING: &str = "ping";

pub struct PingHandler {
    server_name: String,
}

impl PingHandler {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }
}

#[async_trait]
impl RequestHandler for PingHandler {
    fn name(&self) -> &str {
        PING
    }

    fn server_reply(&self) -> bool {
        true
    }

    fn build_request(&self, _args: Value) -> ShardLinkResult<Value> {
        Ok(json!({}))
    }

    async fn answer(&self, _data: Value) -> Option<Value> {
        Some(json!({ "success": true, "server": self.server_name }))
    }
}

impl PointToPointHandler for PingHandler {
    fn route(&self, _owners: &OwnershipMap, _data: &Value) -> Option<Owner> {
        Some(Owner::Local)
    }
}
