//! Server state and connection management.

use std::collections::HashSet;

use tokio::sync::Mutex;

use crate::domain::{ConnectionId, ConnectionRegistry, RoomRegistry};

/// Mutable server core: both registries plus the lobby subscription set.
///
/// Guarded by a single mutex in [`AppState`] held for the duration of each
/// logical operation (create-or-join, add-chat, remove-participant, ...),
/// which restores the atomicity unit the original single-threaded event
/// loop got for free. Outbound sends are non-blocking channel pushes, so
/// holding the lock across the sends of one operation also pins the
/// membership-before-lobby broadcast ordering.
pub struct Core {
    /// Live connections and their outbound channels.
    pub connections: ConnectionRegistry,
    /// Rooms keyed by unique name.
    pub rooms: RoomRegistry,
    /// Connections currently receiving lobby snapshots.
    pub lobby_subscribers: HashSet<ConnectionId>,
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    pub fn new() -> Self {
        Self {
            connections: ConnectionRegistry::new(),
            rooms: RoomRegistry::new(),
            lobby_subscribers: HashSet::new(),
        }
    }
}

/// Shared application state, constructed at startup and injected into the
/// handlers.
pub struct AppState {
    pub core: Mutex<Core>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            core: Mutex::new(Core::new()),
        }
    }
}
