//! Broadcast plumbing: room fan-out and the lobby broadcast hub.
//!
//! Delivery is best-effort and at-most-once: each frame is serialized once
//! and pushed to every writable destination; an unwritable connection simply
//! misses that round. Within one triggering event, membership broadcasts are
//! always issued before the lobby snapshot.

use crate::domain::ConnectionId;
use crate::protocol::ServerFrame;

use super::state::Core;

impl Core {
    /// Send one frame to a single connection. Failures are logged and
    /// otherwise ignored.
    pub fn send(&self, id: ConnectionId, frame: &ServerFrame) {
        if !self.connections.send_to(id, &frame.encode()) {
            tracing::warn!("Failed to send frame to connection '{}'", id);
        }
    }

    /// Deliver a frame to every participant of one room, optionally skipping
    /// one connection. Serializes once; no retry or queueing for
    /// temporarily-unwritable participants.
    pub fn broadcast_to_room(
        &self,
        room_name: &str,
        frame: &ServerFrame,
        exclude: Option<ConnectionId>,
    ) {
        let Some(room) = self.rooms.get(room_name) else {
            return;
        };
        let json = frame.encode();
        for id in room.participant_ids() {
            if Some(id) == exclude {
                continue;
            }
            if !self.connections.send_to(id, &json) {
                tracing::warn!(
                    "Failed to deliver room broadcast to connection '{}' in '{}'",
                    id,
                    room_name
                );
            }
        }
    }

    /// Send the room's current roster to all of its members.
    pub fn broadcast_participants_update(&self, room_name: &str) {
        let frame = ServerFrame::ParticipantsUpdate {
            participants: self.rooms.participant_summaries(room_name),
        };
        self.broadcast_to_room(room_name, &frame, None);
    }

    /// Push a fresh room-list snapshot to every lobby subscriber, pruning
    /// subscribers that are no longer writable as a side effect.
    pub fn broadcast_room_list(&mut self) {
        let frame = ServerFrame::RoomListUpdate {
            rooms: self.rooms.room_metadata(),
        };
        let json = frame.encode();
        let mut dead = Vec::new();
        for &id in &self.lobby_subscribers {
            if !self.connections.send_to(id, &json) {
                dead.push(id);
            }
        }
        for id in dead {
            tracing::debug!("Pruning unwritable lobby subscriber '{}'", id);
            self.lobby_subscribers.remove(&id);
        }
    }
}
