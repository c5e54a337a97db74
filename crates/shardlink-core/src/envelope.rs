//! JSON envelope for the shardlink wire.
//!
//! Every WebSocket text frame carries exactly one envelope:
//! `{"handler": string, "type": "request"|"response", "rtoken": string?, "data": any}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ShardLinkError, ShardLinkResult};
use crate::handler::LOGIN_HANDLER;

/// Maximum accepted text frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Whether an envelope asks for something or answers something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Request,
    Response,
}

/// The wire message unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Name of the handler this message belongs to.
    pub handler: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Correlation token; present whenever a reply is expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtoken: Option<String>,
    /// Handler-defined payload.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(handler: impl Into<String>, rtoken: Option<String>, data: Value) -> Self {
        Self {
            handler: handler.into(),
            kind: EnvelopeKind::Request,
            rtoken,
            data,
        }
    }

    /// Build the response to this envelope, reusing its handler and rtoken.
    pub fn response_to(&self, data: Value) -> Self {
        Self {
            handler: self.handler.clone(),
            kind: EnvelopeKind::Response,
            rtoken: self.rtoken.clone(),
            data,
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind == EnvelopeKind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind == EnvelopeKind::Response
    }
}

/// Encode an envelope into a JSON text frame.
pub fn encode(envelope: &Envelope) -> ShardLinkResult<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode a JSON text frame into an envelope.
pub fn decode(text: &str) -> ShardLinkResult<Envelope> {
    check_size(text)?;
    Ok(serde_json::from_str(text)?)
}

/// Decode a frame received before the connection authenticated.
///
/// Whatever the peer sent is treated as a login request: `handler` is forced
/// to `login` and `type` to `request`. A frame without a `data` member is
/// taken to be a flat login payload and becomes the data itself.
pub fn decode_as_login(text: &str) -> ShardLinkResult<Envelope> {
    check_size(text)?;
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut obj) = value else {
        return Err(ShardLinkError::InvalidMessage(
            "frame is not a JSON object".into(),
        ));
    };

    let rtoken = match obj.remove("rtoken") {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };
    let data = match obj.remove("data") {
        Some(data) => data,
        None => {
            obj.remove("handler");
            obj.remove("type");
            Value::Object(obj)
        }
    };

    Ok(Envelope::request(LOGIN_HANDLER, rtoken, data))
}

fn check_size(text: &str) -> ShardLinkResult<()> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ShardLinkError::InvalidMessage(format!(
            "frame too large: {} bytes (max {})",
            text.len(),
            MAX_FRAME_SIZE
        )));
    }
    Ok(())
}
