//! The built-in `login` handshake payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ShardLinkError, ShardLinkResult};
use crate::member::ClusterMember;

/// Wire name of the login handler.
pub const LOGIN_HANDLER: &str = "login";

/// Payload of a login request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "secret")]
    pub shared_secret: String,
    #[serde(default)]
    pub guilds: Vec<u64>,
    #[serde(default)]
    pub shards: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LoginRequest {
    /// Build a login claiming everything `member` owns.
    pub fn for_member(
        shared_secret: impl Into<String>,
        member: &dyn ClusterMember,
        name: Option<String>,
    ) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            guilds: member.guild_ids(),
            shards: member.shard_ids(),
            name,
        }
    }

    pub fn from_data(data: &Value) -> ShardLinkResult<Self> {
        LoginRequest::deserialize(data)
            .map_err(|e| ShardLinkError::InvalidMessage(format!("bad login payload: {e}")))
    }

    pub fn to_data(&self) -> ShardLinkResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("shared_secret", &"<redacted>")
            .field("guilds", &self.guilds)
            .field("shards", &self.shards)
            .field("name", &self.name)
            .finish()
    }
}

/// Payload of a login response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl LoginResponse {
    pub fn accepted(name: &str) -> Self {
        Self {
            success: true,
            message: format!("logged in as {name}"),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message: reason.into(),
        }
    }

    /// Parse a login reply. Anything unreadable counts as a rejection.
    pub fn from_data(data: &Value) -> Self {
        LoginResponse::deserialize(data)
            .unwrap_or_else(|_| LoginResponse::rejected("malformed login response"))
    }

    pub fn to_data(&self) -> Value {
        serde_json::json!({ "success": self.success, "message": self.message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{GuildRecord, ShardStatus, StaticMember};
    use serde_json::json;

    #[test]
    fn request_from_member() {
        let member = StaticMember::new()
            .with_shard(ShardStatus::healthy(1, 201))
            .with_guild(GuildRecord::new(10, "Guild 10", 1210))
            .with_guild(GuildRecord::new(11, "Guild 11", 3));
        let req = LoginRequest::for_member("secret", &member, None);
        assert_eq!(
            req.to_data().unwrap(),
            json!({"shared_secret": "secret", "guilds": [10, 11], "shards": [1]})
        );
    }

    #[test]
    fn legacy_secret_key_accepted() {
        let req = LoginRequest::from_data(&json!({"secret": "s", "shards": [2]})).unwrap();
        assert_eq!(req.shared_secret, "s");
        assert_eq!(req.shards, vec![2]);
        assert!(req.guilds.is_empty());
    }

    #[test]
    fn missing_secret_is_invalid() {
        assert!(LoginRequest::from_data(&json!({"shards": [1]})).is_err());
        assert!(LoginRequest::from_data(&json!("secret")).is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let req = LoginRequest::from_data(&json!({"shared_secret": "hunter2"})).unwrap();
        assert!(!format!("{req:?}").contains("hunter2"));
    }

    #[test]
    fn garbled_response_is_rejection() {
        assert!(!LoginResponse::from_data(&json!(null)).success);
        assert!(LoginResponse::from_data(&json!({"success": true})).success);
    }
}
