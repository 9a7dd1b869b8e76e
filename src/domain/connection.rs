//! Connection registry: identity and outbound channels for live sockets.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Opaque identifier assigned to each live connection.
///
/// Other components reference a connection only by this id; the registry
/// alone owns the connection record and its outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live client connection.
pub struct Connection {
    pub id: ConnectionId,
    /// Display name set by an identify frame; never validated for uniqueness.
    pub display_name: Option<String>,
    /// Name of the room this connection most recently joined, if any.
    pub current_room: Option<String>,
    /// Outbound channel drained by the connection's send task.
    sender: mpsc::UnboundedSender<String>,
}

/// Tracks every live connection and allocates fresh ids.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    next_id: u64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a new connection and allocate a fresh unique id.
    ///
    /// The connection starts with no display name and no room membership.
    pub fn register(&mut self, sender: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections.insert(
            id,
            Connection {
                id,
                display_name: None,
                current_room: None,
                sender,
            },
        );
        id
    }

    /// Record a display name for the connection. Idempotent; re-identifying
    /// mid-session simply overwrites the stored name.
    pub fn identify(&mut self, id: ConnectionId, name: String) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.display_name = Some(name);
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Remove the connection record. Called once at disconnect, after room
    /// cleanup has read everything it needed.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Fire-and-forget delivery of an already-serialized frame.
    ///
    /// Returns `false` when the connection is unknown or its channel is
    /// closed; the frame is simply not delivered this round.
    pub fn send_to(&self, id: ConnectionId, frame: &str) -> bool {
        match self.connections.get(&id) {
            Some(conn) => conn.sender.send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    /// Display name for the connection, falling back to `User {id}`.
    pub fn display_name(&self, id: ConnectionId) -> String {
        self.connections
            .get(&id)
            .and_then(|c| c.display_name.clone())
            .unwrap_or_else(|| format!("User {}", id))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
