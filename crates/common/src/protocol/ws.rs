// WebSocket message types for the intelhub collaboration protocol.
//
// Client frames are `{ type, data? }`. Server frames are either the private
// `connected` greeting or an envelope `{ type, data?, senderId }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{ConnectionId, ContextId, ContextKind};

/// Well-known `type` values. Anything else is a free-form notification.
pub mod message_type {
    pub const CONNECTED: &str = "connected";
    pub const TYPING_START: &str = "typing_start";
    pub const TYPING_END: &str = "typing_end";
    pub const ANNOTATION_CREATED: &str = "annotation_created";
    pub const ANNOTATION_UPDATED: &str = "annotation_updated";
    pub const FILTER_CHANGE: &str = "filter_change";
    pub const INTELLIGENCE_CREATED: &str = "intelligence_created";
    pub const ALERT_CREATED: &str = "alert_created";
    pub const FEEDBACK_CREATED: &str = "feedback_created";
    pub const USER_ACTIVE: &str = "user_active";
    pub const USER_INACTIVE: &str = "user_inactive";
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid protocol JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}

/// Client -> Server: one application message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ClientMessage {
    pub fn new(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self { kind: kind.into(), data }
    }

    pub fn typing_start(kind: ContextKind, id: Option<ContextId>) -> Self {
        Self::new(message_type::TYPING_START, Some(TypingRequest::new(kind, id).into_value()))
    }

    pub fn typing_end(kind: ContextKind, id: Option<ContextId>) -> Self {
        Self::new(message_type::TYPING_END, Some(TypingRequest::new(kind, id).into_value()))
    }

    pub fn is_typing_signal(&self) -> bool {
        self.kind == message_type::TYPING_START || self.kind == message_type::TYPING_END
    }
}

/// Server -> Client: a relayed event stamped with its originating connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub sender_id: ConnectionId,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Option<Value>, sender_id: ConnectionId) -> Self {
        Self { kind: kind.into(), data, sender_id }
    }

    pub fn is_from(&self, connection_id: &ConnectionId) -> bool {
        &self.sender_id == connection_id
    }
}

/// Server -> Client: private greeting sent once, right after the upgrade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename = "connected", rename_all = "camelCase")]
pub struct ConnectedMessage {
    pub client_id: ConnectionId,
    pub active_users: Vec<String>,
}

/// Anything the server may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Connected(ConnectedMessage),
    Envelope(Envelope),
}

/// `data` of an inbound `typing_start` / `typing_end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TypingRequest {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ContextId>,
}

impl TypingRequest {
    pub fn new(kind: ContextKind, id: Option<ContextId>) -> Self {
        Self { kind: Some(kind.as_str().to_owned()), id }
    }

    /// Lenient parse: unknown fields are ignored, absent data yields the
    /// empty request, and an unusable `id` is treated as absent.
    pub fn from_data(data: Option<&Value>) -> Self {
        let Some(Value::Object(map)) = data else {
            return Self::default();
        };
        Self {
            kind: map.get("type").and_then(Value::as_str).map(ToOwned::to_owned),
            id: map.get("id").and_then(ContextId::from_json),
        }
    }

    pub fn context_kind(&self) -> Option<ContextKind> {
        self.kind.as_deref().and_then(ContextKind::parse)
    }

    fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// `data` of a relayed typing envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub username: String,
    pub context_kind: Option<ContextKind>,
    pub context_id: Option<ContextId>,
}

/// `data` of `user_active` / `user_inactive`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceNotice {
    pub username: String,
}

pub fn decode_client_message(raw: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str::<ClientMessage>(raw)?)
}

pub fn decode_client_bytes(raw: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::NotUtf8)?;
    decode_client_message(text)
}

pub fn decode_server_message(raw: &str) -> Result<ServerMessage, ProtocolError> {
    let value = serde_json::from_str::<Value>(raw)?;
    if value.get("type").and_then(Value::as_str) == Some(message_type::CONNECTED) {
        Ok(ServerMessage::Connected(serde_json::from_value(value)?))
    } else {
        Ok(ServerMessage::Envelope(serde_json::from_value(value)?))
    }
}

pub fn encode_message<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}
