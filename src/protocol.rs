//! Wire protocol: tagged frames exchanged over the WebSocket.
//!
//! Every frame is `{"type": <kebab-case kind>, "payload": <camelCase data>}`.
//! Inbound and outbound kinds are separate sum types so the router's
//! dispatch is an exhaustive match; adding a kind is a compile-time-checked
//! change.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ChatMessage, ConnectionId, ParticipantSummary, RoomSummary};

/// Opaque signaling payload (offer / answer / ICE candidate).
///
/// Only the routing fields are interpreted; the handshake body itself is
/// carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    /// Participant the payload is addressed to; absent means "everyone else
    /// in the sender's room".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ConnectionId>,
    /// Attached by the server on relay so the receiver can demultiplex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<ConnectionId>,
    /// Session description / candidate body, never parsed.
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Frames a client may send.
///
/// Payload fields the state machine validates (room names, text, emoji) are
/// optional here so a missing field surfaces as a validation error reply
/// instead of a dropped frame.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientFrame {
    SubscribeLobby,
    #[serde(rename_all = "camelCase")]
    Identify { name: Option<String> },
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        room_name: Option<String>,
        created_by: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_name: Option<String>,
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_name: Option<String> },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        room_name: Option<String>,
        text: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Reaction {
        room_name: Option<String>,
        emoji: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Typing { room_name: Option<String> },
    SignalOffer(SignalPayload),
    SignalAnswer(SignalPayload),
    SignalIce(SignalPayload),
}

/// Frames the server may send.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    CreateRoomOk {
        room_id: Uuid,
        room_name: String,
        participants: Vec<ParticipantSummary>,
        chat_history: Vec<ChatMessage>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoomOk {
        participants: Vec<ParticipantSummary>,
        chat_history: Vec<ChatMessage>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoomFailed { reason: String },
    ChatMessage(ChatMessage),
    #[serde(rename_all = "camelCase")]
    SystemMessage { text: String },
    #[serde(rename_all = "camelCase")]
    ParticipantsUpdate {
        participants: Vec<ParticipantSummary>,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantJoined { id: ConnectionId, name: String },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { id: ConnectionId },
    #[serde(rename_all = "camelCase")]
    Reaction {
        room_name: String,
        emoji: String,
        sender: String,
        timestamp: String,
    },
    #[serde(rename_all = "camelCase")]
    Typing { room_name: String, sender: String },
    #[serde(rename_all = "camelCase")]
    RoomListUpdate { rooms: Vec<RoomSummary> },
    #[serde(rename_all = "camelCase")]
    Error { reason: String },
    SignalOffer(SignalPayload),
    SignalAnswer(SignalPayload),
    SignalIce(SignalPayload),
}

impl ServerFrame {
    /// Serialize once for fan-out. These frames contain nothing that can
    /// fail to serialize.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("server frame is always serializable")
    }
}
