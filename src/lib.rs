//! Room-based WebSocket chat and signaling server library.
//!
//! Coordinates many concurrently connected clients across a shared set of
//! named rooms: a live lobby listing, room presence tracking, ordered chat
//! history, ephemeral typing/reaction events, and a relay for WebRTC
//! handshake payloads between participants.

// layers
pub mod domain;
pub mod protocol;
pub mod server;

// shared library
pub mod common;
