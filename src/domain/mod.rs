//! Domain layer: connection and room registries.
//!
//! Both registries are plain service objects constructed at startup and
//! injected into the router through the server state; they hold no ambient
//! global state, so tests can build fresh instances per case.

pub mod connection;
pub mod room;

pub use connection::{Connection, ConnectionId, ConnectionRegistry};
pub use room::{
    CHAT_HISTORY_CAP, ChatMessage, Participant, ParticipantSummary, Room, RoomError, RoomRegistry,
    RoomSummary,
};
