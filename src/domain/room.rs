//! Room registry: named rooms, join-ordered participants, bounded chat history.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::common::time::now_rfc3339;

use super::connection::ConnectionId;

/// Maximum chat entries retained per room; the oldest entry is evicted first.
pub const CHAT_HISTORY_CAP: usize = 50;

/// Room-level failures. The display text doubles as the human-readable
/// reason sent back to the offending client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("Room name is required")]
    NameRequired,
    #[error("Room '{0}' already exists")]
    AlreadyExists(String),
    #[error("Room '{0}' does not exist")]
    NotFound(String),
    #[error("You are not a member of room '{0}'")]
    NotAMember(String),
}

/// A connection's membership record within one room.
///
/// Holds only the connection id and a display-name snapshot taken at join
/// time; outbound delivery always goes back through the connection registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ConnectionId,
    pub name: String,
}

/// One stored chat entry. Immutable once created.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_name: String,
    pub sender_id: ConnectionId,
    pub sender_name: String,
    pub text: String,
    pub timestamp: String,
}

/// Display-safe participant projection for replies and broadcasts.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: ConnectionId,
    pub name: String,
}

/// Lobby snapshot entry.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: Uuid,
    pub name: String,
    pub participant_count: usize,
}

/// A named room: participants in join order plus bounded chat history.
pub struct Room {
    pub id: Uuid,
    pub name: String,
    participants: Vec<Participant>,
    chat_history: VecDeque<ChatMessage>,
}

impl Room {
    fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            participants: Vec::new(),
            chat_history: VecDeque::new(),
        }
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_member(&self, id: ConnectionId) -> bool {
        self.participants.iter().any(|p| p.id == id)
    }

    /// Participant ids in join order.
    pub fn participant_ids(&self) -> Vec<ConnectionId> {
        self.participants.iter().map(|p| p.id).collect()
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.chat_history.iter().cloned().collect()
    }
}

/// Owns the set of rooms, keyed by their unique name.
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    pub fn room_exists(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    /// Return the existing room for `name`, or allocate a fresh one.
    ///
    /// The registry is the single owner of the room map and every logical
    /// operation runs under the server's state lock, so two rooms can never
    /// be produced for the same name.
    pub fn get_or_create(&mut self, name: &str) -> &mut Room {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name.to_string()))
    }

    /// Create a room that must not exist yet.
    pub fn create(&mut self, name: &str) -> Result<&mut Room, RoomError> {
        if self.rooms.contains_key(name) {
            return Err(RoomError::AlreadyExists(name.to_string()));
        }
        Ok(self
            .rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name.to_string())))
    }

    /// Insert a participant by connection id. Re-joining with the same id
    /// replaces the prior entry in place, keeping its join-order position.
    pub fn add_participant(
        &mut self,
        room_name: &str,
        participant: Participant,
    ) -> Result<(), RoomError> {
        let room = self
            .rooms
            .get_mut(room_name)
            .ok_or_else(|| RoomError::NotFound(room_name.to_string()))?;
        if let Some(existing) = room.participants.iter_mut().find(|p| p.id == participant.id) {
            *existing = participant;
        } else {
            room.participants.push(participant);
        }
        Ok(())
    }

    /// Remove and return the participant record, if present.
    ///
    /// Never deletes the room itself; emptiness is handled explicitly by
    /// [`RoomRegistry::retire_if_empty`].
    pub fn remove_participant(
        &mut self,
        room_name: &str,
        id: ConnectionId,
    ) -> Option<Participant> {
        let room = self.rooms.get_mut(room_name)?;
        let index = room.participants.iter().position(|p| p.id == id)?;
        Some(room.participants.remove(index))
    }

    /// Delete the room when it has no participants left. Returns `true` when
    /// the room was removed.
    pub fn retire_if_empty(&mut self, room_name: &str) -> bool {
        if self
            .rooms
            .get(room_name)
            .is_some_and(|room| room.participants.is_empty())
        {
            self.rooms.remove(room_name);
            return true;
        }
        false
    }

    /// Defensive full scan used at disconnect: remove the connection from
    /// every room it occupies and delete rooms this empties. A connection is
    /// expected to occupy at most one room, but this guards against any
    /// inconsistency.
    ///
    /// Returns `(room name, removed participant)` for each affected room.
    pub fn remove_from_all_rooms(&mut self, id: ConnectionId) -> Vec<(String, Participant)> {
        let mut affected = Vec::new();
        for (name, room) in self.rooms.iter_mut() {
            if let Some(index) = room.participants.iter().position(|p| p.id == id) {
                let participant = room.participants.remove(index);
                affected.push((name.clone(), participant));
            }
        }
        for (name, _) in &affected {
            self.retire_if_empty(name);
        }
        affected
    }

    /// Stamp, append, and return the canonical chat entry.
    ///
    /// The caller broadcasts the returned (server-stamped) copy, never the
    /// client's original.
    pub fn add_chat_message(
        &mut self,
        room_name: &str,
        sender_id: ConnectionId,
        sender_name: String,
        text: String,
    ) -> Result<ChatMessage, RoomError> {
        let room = self
            .rooms
            .get_mut(room_name)
            .ok_or_else(|| RoomError::NotFound(room_name.to_string()))?;
        let entry = ChatMessage {
            id: Uuid::new_v4(),
            room_name: room_name.to_string(),
            sender_id,
            sender_name,
            text,
            timestamp: now_rfc3339(),
        };
        room.chat_history.push_back(entry.clone());
        while room.chat_history.len() > CHAT_HISTORY_CAP {
            room.chat_history.pop_front();
        }
        Ok(entry)
    }

    /// Snapshot of every room's metadata for the lobby, sorted by name for
    /// a stable listing.
    pub fn room_metadata(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .values()
            .map(|room| RoomSummary {
                id: room.id,
                name: room.name.clone(),
                participant_count: room.participants.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Display-safe roster in join order. Empty when the room is unknown.
    pub fn participant_summaries(&self, room_name: &str) -> Vec<ParticipantSummary> {
        self.rooms
            .get(room_name)
            .map(|room| {
                room.participants
                    .iter()
                    .map(|p| ParticipantSummary {
                        id: p.id,
                        name: p.name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
