//! JSON wire protocol spoken over the workspace WebSocket.
//!
//! Every frame is either one tagged message or an array of them:
//! ```text
//! {"kind":"Ping"}
//! [{"kind":"SessionIdentifier","sessionId":"ws-3f2a"},
//!  {"kind":"ChannelUpdate","channel":"urn:atelier:project:7","diff":1},
//!  {"kind":"UpdateMessage","updated":[{"@class":"Card","id":5}],"deleted":[]}]
//! ```
//!
//! Messages inside one frame are demultiplexed by kind before any handler
//! runs; see [`InboundFrame::demux`].

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{EntityId, HttpSession, UpdateBatch};

/// Opaque identifier the server assigns to one live WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four kinds of subscription scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKind {
    Broadcast,
    User,
    ProjectContent,
    Block,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Broadcast => "Broadcast",
            ChannelKind::User => "User",
            ChannelKind::ProjectContent => "ProjectContent",
            ChannelKind::Block => "Block",
        }
    }
}

/// A subscription scope. Identity is `(kind, target)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Broadcast,
    User(EntityId),
    ProjectContent(EntityId),
    Block(EntityId),
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Broadcast => ChannelKind::Broadcast,
            Channel::User(_) => ChannelKind::User,
            Channel::ProjectContent(_) => ChannelKind::ProjectContent,
            Channel::Block(_) => ChannelKind::Block,
        }
    }

    /// Target id, `None` for the broadcast channel.
    pub fn target(&self) -> Option<EntityId> {
        match self {
            Channel::Broadcast => None,
            Channel::User(id) | Channel::ProjectContent(id) | Channel::Block(id) => Some(*id),
        }
    }

    /// URN the server uses to name this channel in occupancy diffs.
    pub fn urn(&self) -> String {
        match self {
            Channel::Broadcast => "urn:atelier:broadcast".to_string(),
            Channel::User(id) => format!("urn:atelier:user:{id}"),
            Channel::ProjectContent(id) => format!("urn:atelier:project:{id}"),
            Channel::Block(id) => format!("urn:atelier:block:{id}"),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(id) => write!(f, "{}({id})", self.kind().as_str()),
            None => f.write_str(self.kind().as_str()),
        }
    }
}

/// One logical message on the wire, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WsMessage {
    Ping,
    Pong,
    SessionIdentifier {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    ChannelUpdate {
        channel: String,
        diff: i64,
    },
    UpdateMessage(UpdateBatch),
    SignOut {
        session: HttpSession,
    },
}

impl WsMessage {
    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize a single message.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// A parsed inbound frame: every message that decoded, plus a count of the
/// ones that did not.
#[derive(Debug, Clone, Default)]
pub struct InboundFrame {
    pub messages: Vec<WsMessage>,
    pub rejected: usize,
}

impl InboundFrame {
    /// Parse a text frame holding one message or an array of messages.
    ///
    /// A frame that is not JSON at all is an error. Individual messages with
    /// an unknown `kind` or a malformed body are skipped and counted, the
    /// rest of the frame still goes through.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;

        let raw = match value {
            Value::Array(items) => items,
            single => vec![single],
        };

        let mut frame = InboundFrame::default();
        for item in raw {
            match serde_json::from_value::<WsMessage>(item) {
                Ok(msg) => frame.messages.push(msg),
                Err(e) => {
                    warn!("Skipping undecodable message in frame: {e}");
                    frame.rejected += 1;
                }
            }
        }
        Ok(frame)
    }

    /// Split the frame by message kind, keeping arrival order within a kind.
    pub fn demux(self) -> Demuxed {
        let mut out = Demuxed::default();
        for msg in self.messages {
            match msg {
                WsMessage::Ping => out.pings += 1,
                WsMessage::Pong => out.pongs += 1,
                WsMessage::SessionIdentifier { session_id } => out.session_ids.push(session_id),
                WsMessage::ChannelUpdate { channel, diff } => out.channel_updates.push((channel, diff)),
                WsMessage::UpdateMessage(batch) => out.updates.push(batch),
                WsMessage::SignOut { session } => out.sign_outs.push(session),
            }
        }
        out
    }
}

/// Messages of one frame bucketed by kind. Handlers run in field order.
#[derive(Debug, Clone, Default)]
pub struct Demuxed {
    pub pings: usize,
    pub pongs: usize,
    pub session_ids: Vec<SessionId>,
    pub channel_updates: Vec<(String, i64)>,
    pub updates: Vec<UpdateBatch>,
    pub sign_outs: Vec<HttpSession>,
}

/// Protocol errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ping_encodes_as_tagged_object() {
        assert_eq!(WsMessage::Ping.encode().unwrap(), r#"{"kind":"Ping"}"#);
        assert_eq!(WsMessage::Pong.encode().unwrap(), r#"{"kind":"Pong"}"#);
    }

    #[test]
    fn test_session_identifier_decode() {
        let msg = WsMessage::decode(r#"{"kind":"SessionIdentifier","sessionId":"ws-1"}"#).unwrap();
        assert_eq!(
            msg,
            WsMessage::SessionIdentifier {
                session_id: SessionId::new("ws-1")
            }
        );
    }

    #[test]
    fn test_update_message_decode() {
        let text = json!({
            "kind": "UpdateMessage",
            "updated": [{"@class": "Card", "id": 5}],
            "deleted": [{"type": "Card", "id": 4}]
        })
        .to_string();
        match WsMessage::decode(&text).unwrap() {
            WsMessage::UpdateMessage(batch) => {
                assert_eq!(batch.updated.len(), 1);
                assert_eq!(batch.deleted.len(), 1);
                assert_eq!(batch.deleted[0]["type"], "Card");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_update_message_missing_lists_default_empty() {
        let msg = WsMessage::decode(r#"{"kind":"UpdateMessage"}"#).unwrap();
        assert_eq!(msg, WsMessage::UpdateMessage(UpdateBatch::default()));
    }

    #[test]
    fn test_frame_single_object() {
        let frame = InboundFrame::parse(r#"{"kind":"Ping"}"#).unwrap();
        assert_eq!(frame.messages, vec![WsMessage::Ping]);
        assert_eq!(frame.rejected, 0);
    }

    #[test]
    fn test_frame_array_skips_unknown_kinds() {
        let frame = InboundFrame::parse(
            r#"[{"kind":"Ping"},{"kind":"Telemetry","x":1},{"kind":"ChannelUpdate","channel":"urn:atelier:broadcast","diff":2}]"#,
        )
        .unwrap();
        assert_eq!(frame.messages.len(), 2);
        assert_eq!(frame.rejected, 1);
    }

    #[test]
    fn test_frame_not_json_is_error() {
        assert!(InboundFrame::parse("not json").is_err());
    }

    #[test]
    fn test_demux_buckets_by_kind() {
        let frame = InboundFrame::parse(
            &json!([
                {"kind": "UpdateMessage", "updated": [], "deleted": []},
                {"kind": "Ping"},
                {"kind": "SessionIdentifier", "sessionId": "a"},
                {"kind": "Ping"},
                {"kind": "SignOut", "session": {"@class": "HttpSession", "id": 3}},
                {"kind": "ChannelUpdate", "channel": "urn:atelier:user:1", "diff": -1},
                {"kind": "UpdateMessage", "updated": [], "deleted": []}
            ])
            .to_string(),
        )
        .unwrap();
        let demuxed = frame.demux();
        assert_eq!(demuxed.pings, 2);
        assert_eq!(demuxed.pongs, 0);
        assert_eq!(demuxed.session_ids, vec![SessionId::new("a")]);
        assert_eq!(demuxed.channel_updates, vec![("urn:atelier:user:1".to_string(), -1)]);
        assert_eq!(demuxed.updates.len(), 2);
        assert_eq!(demuxed.sign_outs[0].id, 3);
    }

    #[test]
    fn test_channel_identity_and_urn() {
        assert_eq!(Channel::Broadcast.target(), None);
        assert_eq!(Channel::User(4).kind(), ChannelKind::User);
        assert_eq!(Channel::ProjectContent(9).urn(), "urn:atelier:project:9");
        assert_eq!(Channel::Block(2).to_string(), "Block(2)");
        assert_ne!(Channel::Block(2), Channel::ProjectContent(2));
    }
}
