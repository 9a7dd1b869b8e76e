//! Message router: parses inbound frames, validates them against the
//! sender's state, and dispatches to the room/lobby/signaling handlers.
//!
//! Failure handling follows a strict taxonomy: unparseable frames and
//! unknown kinds are logged and dropped, validation failures get an explicit
//! error reply with no state mutation, and a misbehaving frame never
//! terminates the connection.

use crate::domain::{ConnectionId, Participant, RoomError};
use crate::protocol::{ClientFrame, ServerFrame, SignalPayload};

use super::state::{AppState, Core};

/// Handshake message kinds the relay forwards without interpreting.
#[derive(Debug, Clone, Copy)]
enum SignalKind {
    Offer,
    Answer,
    Ice,
}

impl SignalKind {
    fn frame(self, payload: SignalPayload) -> ServerFrame {
        match self {
            SignalKind::Offer => ServerFrame::SignalOffer(payload),
            SignalKind::Answer => ServerFrame::SignalAnswer(payload),
            SignalKind::Ice => ServerFrame::SignalIce(payload),
        }
    }
}

/// Handle one inbound frame from a connection, start to finish, under the
/// state lock. Frames from a single connection arrive here in send order.
pub async fn handle_frame(state: &AppState, conn_id: ConnectionId, text: &str) {
    let mut core = state.core.lock().await;
    route_text(&mut core, conn_id, text);
}

/// Connection teardown: the only cancellation signal. Removes the connection
/// from the lobby set and every room, broadcasts departures, then discards
/// the connection record.
pub async fn handle_disconnect(state: &AppState, conn_id: ConnectionId) {
    let mut core = state.core.lock().await;
    core.disconnect(conn_id);
}

/// Parse and dispatch one raw frame.
pub fn route_text(core: &mut Core, conn_id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => core.dispatch(conn_id, frame),
        Err(err) => log_rejected_frame(conn_id, text, &err),
    }
}

/// Distinguish an unknown-but-well-formed kind (forward compatibility) from
/// a frame that is not parseable at all. Neither produces a reply.
fn log_rejected_frame(conn_id: ConnectionId, text: &str, err: &serde_json::Error) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) if value.get("type").is_some_and(|t| t.is_string()) => {
            tracing::warn!(
                "Ignoring frame with unknown or invalid kind '{}' from connection '{}': {}",
                value["type"].as_str().unwrap_or_default(),
                conn_id,
                err
            );
        }
        _ => {
            tracing::warn!(
                "Failed to parse frame from connection '{}': {}",
                conn_id,
                err
            );
        }
    }
}

impl Core {
    /// Exhaustive dispatch over the protocol's sum type; adding a message
    /// kind is a compile-time-checked change.
    pub fn dispatch(&mut self, conn_id: ConnectionId, frame: ClientFrame) {
        match frame {
            ClientFrame::SubscribeLobby => self.subscribe_lobby(conn_id),
            ClientFrame::Identify { name } => self.identify(conn_id, name),
            ClientFrame::CreateRoom {
                room_name,
                created_by,
            } => self.create_room(conn_id, room_name, created_by),
            ClientFrame::JoinRoom { room_name, name } => self.join_room(conn_id, room_name, name),
            ClientFrame::LeaveRoom { room_name } => self.leave_room(conn_id, room_name),
            ClientFrame::ChatMessage { room_name, text } => self.chat(conn_id, room_name, text),
            ClientFrame::Reaction { room_name, emoji } => {
                self.reaction(conn_id, room_name, emoji)
            }
            ClientFrame::Typing { room_name } => self.typing(conn_id, room_name),
            ClientFrame::SignalOffer(payload) => {
                self.relay_signal(conn_id, SignalKind::Offer, payload)
            }
            ClientFrame::SignalAnswer(payload) => {
                self.relay_signal(conn_id, SignalKind::Answer, payload)
            }
            ClientFrame::SignalIce(payload) => self.relay_signal(conn_id, SignalKind::Ice, payload),
        }
    }

    fn reject(&self, conn_id: ConnectionId, reason: String) {
        self.send(conn_id, &ServerFrame::Error { reason });
    }

    /// Resolve the display name to use for a join, preferring the name
    /// carried in the frame and recording it on the connection when present.
    fn resolve_name(&mut self, conn_id: ConnectionId, provided: Option<String>) -> String {
        match normalize(provided) {
            Some(name) => {
                self.connections.identify(conn_id, name.clone());
                name
            }
            None => self.connections.display_name(conn_id),
        }
    }

    fn subscribe_lobby(&mut self, conn_id: ConnectionId) {
        self.lobby_subscribers.insert(conn_id);
        let snapshot = ServerFrame::RoomListUpdate {
            rooms: self.rooms.room_metadata(),
        };
        self.send(conn_id, &snapshot);
        tracing::debug!("Connection '{}' subscribed to lobby updates", conn_id);
    }

    fn identify(&mut self, conn_id: ConnectionId, name: Option<String>) {
        match normalize(name) {
            Some(name) => {
                tracing::info!("Connection '{}' identified as '{}'", conn_id, name);
                self.connections.identify(conn_id, name);
            }
            None => tracing::debug!("Ignoring identify without a name from '{}'", conn_id),
        }
    }

    fn create_room(
        &mut self,
        conn_id: ConnectionId,
        room_name: Option<String>,
        created_by: Option<String>,
    ) {
        let Some(room_name) = normalize(room_name) else {
            self.reject(conn_id, RoomError::NameRequired.to_string());
            return;
        };
        if self.rooms.room_exists(&room_name) {
            self.reject(conn_id, RoomError::AlreadyExists(room_name).to_string());
            return;
        }

        let display_name = self.resolve_name(conn_id, created_by);
        let room_id = match self.rooms.create(&room_name) {
            Ok(room) => room.id,
            Err(err) => {
                self.reject(conn_id, err.to_string());
                return;
            }
        };
        if let Err(err) = self.rooms.add_participant(
            &room_name,
            Participant {
                id: conn_id,
                name: display_name,
            },
        ) {
            self.reject(conn_id, err.to_string());
            return;
        }
        if let Some(conn) = self.connections.get_mut(conn_id) {
            conn.current_room = Some(room_name.clone());
        }
        tracing::info!("Connection '{}' created room '{}'", conn_id, room_name);

        self.send(
            conn_id,
            &ServerFrame::CreateRoomOk {
                room_id,
                room_name: room_name.clone(),
                participants: self.rooms.participant_summaries(&room_name),
                chat_history: Vec::new(),
            },
        );
        // Membership broadcast before the lobby snapshot, always.
        self.broadcast_participants_update(&room_name);
        self.broadcast_room_list();
    }

    fn join_room(
        &mut self,
        conn_id: ConnectionId,
        room_name: Option<String>,
        name: Option<String>,
    ) {
        let Some(room_name) = normalize(room_name) else {
            self.reject(conn_id, RoomError::NameRequired.to_string());
            return;
        };
        if !self.rooms.room_exists(&room_name) {
            self.send(
                conn_id,
                &ServerFrame::JoinRoomFailed {
                    reason: RoomError::NotFound(room_name).to_string(),
                },
            );
            return;
        }

        let display_name = self.resolve_name(conn_id, name);
        if let Err(err) = self.rooms.add_participant(
            &room_name,
            Participant {
                id: conn_id,
                name: display_name.clone(),
            },
        ) {
            self.reject(conn_id, err.to_string());
            return;
        }
        if let Some(conn) = self.connections.get_mut(conn_id) {
            conn.current_room = Some(room_name.clone());
        }
        tracing::info!(
            "Connection '{}' joined room '{}' as '{}'",
            conn_id,
            room_name,
            display_name
        );

        let Some(room) = self.rooms.get(&room_name) else {
            return;
        };
        let chat_history = room.chat_history();
        self.send(
            conn_id,
            &ServerFrame::JoinRoomOk {
                participants: self.rooms.participant_summaries(&room_name),
                chat_history,
            },
        );
        self.broadcast_to_room(
            &room_name,
            &ServerFrame::ParticipantJoined {
                id: conn_id,
                name: display_name.clone(),
            },
            Some(conn_id),
        );
        self.broadcast_to_room(
            &room_name,
            &ServerFrame::SystemMessage {
                text: format!("{} joined the room", display_name),
            },
            Some(conn_id),
        );
        self.broadcast_participants_update(&room_name);
        self.broadcast_room_list();
    }

    fn leave_room(&mut self, conn_id: ConnectionId, room_name: Option<String>) {
        let Some(room_name) = normalize(room_name) else {
            self.reject(conn_id, RoomError::NameRequired.to_string());
            return;
        };
        if !self.rooms.room_exists(&room_name) {
            self.reject(conn_id, RoomError::NotFound(room_name).to_string());
            return;
        }
        let Some(participant) = self.rooms.remove_participant(&room_name, conn_id) else {
            self.reject(conn_id, RoomError::NotAMember(room_name).to_string());
            return;
        };
        if let Some(conn) = self.connections.get_mut(conn_id)
            && conn.current_room.as_deref() == Some(room_name.as_str())
        {
            conn.current_room = None;
        }
        tracing::info!("Connection '{}' left room '{}'", conn_id, room_name);

        self.broadcast_to_room(
            &room_name,
            &ServerFrame::ParticipantLeft { id: conn_id },
            None,
        );
        self.broadcast_to_room(
            &room_name,
            &ServerFrame::SystemMessage {
                text: format!("{} left the room", participant.name),
            },
            None,
        );
        self.broadcast_participants_update(&room_name);
        if self.rooms.retire_if_empty(&room_name) {
            tracing::info!("Room '{}' is empty and was retired", room_name);
        }
        self.broadcast_room_list();
    }

    fn chat(&mut self, conn_id: ConnectionId, room_name: Option<String>, text: Option<String>) {
        let Some(room_name) = normalize(room_name) else {
            self.reject(conn_id, RoomError::NameRequired.to_string());
            return;
        };
        let Some(text) = normalize(text) else {
            self.reject(conn_id, "Message text is required".to_string());
            return;
        };
        match self.room_membership(conn_id, &room_name) {
            Ok(()) => {}
            Err(err) => {
                self.reject(conn_id, err.to_string());
                return;
            }
        }

        let sender_name = self.connections.display_name(conn_id);
        let entry = match self
            .rooms
            .add_chat_message(&room_name, conn_id, sender_name, text)
        {
            Ok(entry) => entry,
            Err(err) => {
                self.reject(conn_id, err.to_string());
                return;
            }
        };
        // Everyone, sender included, receives the canonical stamped copy.
        self.broadcast_to_room(&room_name, &ServerFrame::ChatMessage(entry), None);
    }

    fn reaction(&mut self, conn_id: ConnectionId, room_name: Option<String>, emoji: Option<String>) {
        let Some(room_name) = normalize(room_name) else {
            self.reject(conn_id, RoomError::NameRequired.to_string());
            return;
        };
        let Some(emoji) = normalize(emoji) else {
            self.reject(conn_id, "Emoji is required".to_string());
            return;
        };
        match self.room_membership(conn_id, &room_name) {
            Ok(()) => {}
            Err(err) => {
                self.reject(conn_id, err.to_string());
                return;
            }
        }

        // Ephemeral: broadcast only, never persisted.
        let frame = ServerFrame::Reaction {
            room_name: room_name.clone(),
            emoji,
            sender: self.connections.display_name(conn_id),
            timestamp: crate::common::time::now_rfc3339(),
        };
        self.broadcast_to_room(&room_name, &frame, None);
    }

    fn typing(&mut self, conn_id: ConnectionId, room_name: Option<String>) {
        let Some(room_name) = normalize(room_name) else {
            self.reject(conn_id, RoomError::NameRequired.to_string());
            return;
        };
        match self.room_membership(conn_id, &room_name) {
            Ok(()) => {}
            Err(err) => {
                self.reject(conn_id, err.to_string());
                return;
            }
        }

        let frame = ServerFrame::Typing {
            room_name: room_name.clone(),
            sender: self.connections.display_name(conn_id),
        };
        self.broadcast_to_room(&room_name, &frame, Some(conn_id));
    }

    /// Relay an opaque handshake payload. The sender must currently be in a
    /// room; otherwise the message is silently dropped. Target-not-found is
    /// logged only, with no error surfaced to the sender.
    fn relay_signal(&mut self, conn_id: ConnectionId, kind: SignalKind, mut payload: SignalPayload) {
        let Some(room_name) = self
            .connections
            .get(conn_id)
            .and_then(|c| c.current_room.clone())
        else {
            tracing::debug!(
                "Dropping {:?} signal from '{}' with no current room",
                kind,
                conn_id
            );
            return;
        };
        let Some(room) = self.rooms.get(&room_name) else {
            tracing::debug!(
                "Dropping {:?} signal from '{}': room '{}' is gone",
                kind,
                conn_id,
                room_name
            );
            return;
        };

        payload.sender_id = Some(conn_id);
        match payload.target_id {
            Some(target) => {
                if !room.is_member(target) {
                    tracing::warn!(
                        "Dropping {:?} signal from '{}': target '{}' is not in room '{}'",
                        kind,
                        conn_id,
                        target,
                        room_name
                    );
                    return;
                }
                let frame = kind.frame(payload);
                if !self.connections.send_to(target, &frame.encode()) {
                    tracing::warn!(
                        "Dropping {:?} signal from '{}': target '{}' is not writable",
                        kind,
                        conn_id,
                        target
                    );
                }
            }
            None => {
                let frame = kind.frame(payload);
                self.broadcast_to_room(&room_name, &frame, Some(conn_id));
            }
        }
    }

    fn room_membership(&self, conn_id: ConnectionId, room_name: &str) -> Result<(), RoomError> {
        let room = self
            .rooms
            .get(room_name)
            .ok_or_else(|| RoomError::NotFound(room_name.to_string()))?;
        if !room.is_member(conn_id) {
            return Err(RoomError::NotAMember(room_name.to_string()));
        }
        Ok(())
    }

    /// Best-effort disconnect cleanup; there is no one left to reply to, so
    /// nothing here is an error condition.
    pub fn disconnect(&mut self, conn_id: ConnectionId) {
        self.lobby_subscribers.remove(&conn_id);

        let affected = self.rooms.remove_from_all_rooms(conn_id);
        for (room_name, participant) in &affected {
            // Rooms emptied by the removal are already gone; broadcasting to
            // them is a no-op.
            self.broadcast_to_room(
                room_name,
                &ServerFrame::ParticipantLeft { id: conn_id },
                None,
            );
            self.broadcast_to_room(
                room_name,
                &ServerFrame::SystemMessage {
                    text: format!("{} left the room", participant.name),
                },
                None,
            );
            self.broadcast_participants_update(room_name);
        }
        if !affected.is_empty() {
            self.broadcast_room_list();
        }

        self.connections.unregister(conn_id);
        tracing::info!("Connection '{}' disconnected and cleaned up", conn_id);
    }
}

/// Trim user-supplied text, mapping missing or blank values to `None`.
fn normalize(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CHAT_HISTORY_CAP;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    fn connect(core: &mut Core) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (core.connections.register(tx), rx)
    }

    fn send(core: &mut Core, conn_id: ConnectionId, kind: &str, payload: Value) {
        let text = json!({"type": kind, "payload": payload}).to_string();
        route_text(core, conn_id, &text);
    }

    fn subscribe_lobby(core: &mut Core, conn_id: ConnectionId) {
        route_text(core, conn_id, r#"{"type":"subscribe-lobby"}"#);
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    fn kinds(frames: &[Value]) -> Vec<String> {
        frames
            .iter()
            .map(|f| f["type"].as_str().unwrap().to_string())
            .collect()
    }

    /// Connect and join `room`, discarding the setup traffic.
    fn join(
        core: &mut Core,
        room: &str,
        name: &str,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (id, mut rx) = connect(core);
        if core.rooms.room_exists(room) {
            send(core, id, "join-room", json!({"roomName": room, "name": name}));
        } else {
            send(
                core,
                id,
                "create-room",
                json!({"roomName": room, "createdBy": name}),
            );
        }
        drain(&mut rx);
        (id, rx)
    }

    #[test]
    fn test_subscribe_lobby_replies_with_snapshot() {
        // given (precondition): one existing room
        let mut core = Core::new();
        let (_ann, _ann_rx) = join(&mut core, "study-1", "Ann");
        let (bo, mut bo_rx) = connect(&mut core);

        // when (operation):
        subscribe_lobby(&mut core, bo);

        // then (expected result): current metadata snapshot, sender subscribed
        let frames = drain(&mut bo_rx);
        assert_eq!(kinds(&frames), vec!["room-list-update"]);
        let rooms = frames[0]["payload"]["rooms"].as_array().unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0]["name"], "study-1");
        assert_eq!(rooms[0]["participantCount"], 1);
        assert!(core.lobby_subscribers.contains(&bo));
    }

    #[test]
    fn test_create_room_ok_then_membership_then_lobby() {
        // given (precondition): the creator also watches the lobby
        let mut core = Core::new();
        let (ann, mut ann_rx) = connect(&mut core);
        subscribe_lobby(&mut core, ann);
        drain(&mut ann_rx);

        // when (operation):
        send(
            &mut core,
            ann,
            "create-room",
            json!({"roomName": "study-1", "createdBy": "Ann"}),
        );

        // then (expected result): reply, then roster, then lobby snapshot
        let frames = drain(&mut ann_rx);
        assert_eq!(
            kinds(&frames),
            vec!["create-room-ok", "participants-update", "room-list-update"]
        );
        assert_eq!(frames[0]["payload"]["roomName"], "study-1");
        assert_eq!(
            frames[0]["payload"]["participants"][0]["name"],
            "Ann"
        );
        assert_eq!(
            frames[0]["payload"]["chatHistory"].as_array().unwrap().len(),
            0
        );
        assert_eq!(frames[2]["payload"]["rooms"][0]["participantCount"], 1);
    }

    #[test]
    fn test_create_room_empty_name_rejected_without_mutation() {
        // given (precondition):
        let mut core = Core::new();
        let (ann, mut ann_rx) = connect(&mut core);

        // when (operation):
        send(&mut core, ann, "create-room", json!({"roomName": "   "}));

        // then (expected result):
        let frames = drain(&mut ann_rx);
        assert_eq!(kinds(&frames), vec!["error"]);
        assert_eq!(frames[0]["payload"]["reason"], "Room name is required");
        assert_eq!(core.rooms.room_count(), 0);
    }

    #[test]
    fn test_create_duplicate_room_rejected_and_first_room_untouched() {
        // given (precondition): room created once
        let mut core = Core::new();
        let (_ann, _ann_rx) = join(&mut core, "r1", "Ann");
        let (bo, mut bo_rx) = connect(&mut core);

        // when (operation): second create with the same name
        send(
            &mut core,
            bo,
            "create-room",
            json!({"roomName": "r1", "createdBy": "Bo"}),
        );

        // then (expected result): error reply, participant count still 1
        let frames = drain(&mut bo_rx);
        assert_eq!(kinds(&frames), vec!["error"]);
        assert_eq!(frames[0]["payload"]["reason"], "Room 'r1' already exists");
        assert_eq!(core.rooms.get("r1").unwrap().participant_count(), 1);
        assert!(core.connections.get(bo).unwrap().current_room.is_none());
    }

    #[test]
    fn test_join_missing_room_fails_without_side_effects() {
        // given (precondition): a lobby subscriber who would see any change
        let mut core = Core::new();
        let (ann, mut ann_rx) = connect(&mut core);
        subscribe_lobby(&mut core, ann);
        drain(&mut ann_rx);
        let (bo, mut bo_rx) = connect(&mut core);

        // when (operation):
        send(&mut core, bo, "join-room", json!({"roomName": "ghost"}));

        // then (expected result): failure reply only; no room, no broadcast
        let frames = drain(&mut bo_rx);
        assert_eq!(kinds(&frames), vec!["join-room-failed"]);
        assert_eq!(
            frames[0]["payload"]["reason"],
            "Room 'ghost' does not exist"
        );
        assert_eq!(core.rooms.room_count(), 0);
        assert!(drain(&mut ann_rx).is_empty());
    }

    #[test]
    fn test_join_room_ok_carries_roster_and_history() {
        // given (precondition): Ann created the room and said something
        let mut core = Core::new();
        let (_ann, _ann_rx) = join(&mut core, "study-1", "Ann");
        send(
            &mut core,
            _ann,
            "chat-message",
            json!({"roomName": "study-1", "text": "hello"}),
        );

        // when (operation): Bo joins
        let (bo, mut bo_rx) = connect(&mut core);
        send(
            &mut core,
            bo,
            "join-room",
            json!({"roomName": "study-1", "name": "Bo"}),
        );

        // then (expected result): roster has both, history has the chat
        let frames = drain(&mut bo_rx);
        assert_eq!(frames[0]["type"], "join-room-ok");
        let participants = frames[0]["payload"]["participants"].as_array().unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0]["name"], "Ann");
        assert_eq!(participants[1]["name"], "Bo");
        let history = frames[0]["payload"]["chatHistory"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["text"], "hello");
        assert_eq!(history[0]["senderName"], "Ann");
    }

    #[test]
    fn test_join_notifies_existing_members_before_lobby() {
        // given (precondition): Ann in the room and subscribed to the lobby
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        subscribe_lobby(&mut core, ann);
        drain(&mut ann_rx);

        // when (operation):
        let (_bo, _bo_rx) = join(&mut core, "study-1", "Bo");

        // then (expected result): join notices, roster, then lobby snapshot;
        // two tabs never observe the lobby ahead of the roster
        let frames = drain(&mut ann_rx);
        assert_eq!(
            kinds(&frames),
            vec![
                "participant-joined",
                "system-message",
                "participants-update",
                "room-list-update"
            ]
        );
        assert_eq!(frames[0]["payload"]["name"], "Bo");
        assert_eq!(frames[1]["payload"]["text"], "Bo joined the room");
        assert_eq!(
            frames[2]["payload"]["participants"].as_array().unwrap().len(),
            2
        );
        assert_eq!(frames[3]["payload"]["rooms"][0]["participantCount"], 2);
    }

    #[test]
    fn test_chat_broadcasts_canonical_entry_to_everyone() {
        // given (precondition): Ann and Bo in "study-1"
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        let (_bo, mut bo_rx) = join(&mut core, "study-1", "Bo");
        drain(&mut ann_rx);

        // when (operation):
        send(
            &mut core,
            ann,
            "chat-message",
            json!({"roomName": "study-1", "text": "hello"}),
        );

        // then (expected result): both receive the server-stamped copy
        for rx in [&mut ann_rx, &mut bo_rx] {
            let frames = drain(rx);
            assert_eq!(kinds(&frames), vec!["chat-message"]);
            let payload = &frames[0]["payload"];
            assert_eq!(payload["senderName"], "Ann");
            assert_eq!(payload["text"], "hello");
            assert_eq!(payload["senderId"], ann.0);
            assert!(payload["timestamp"].is_string());
            assert!(payload["id"].is_string());
        }
    }

    #[test]
    fn test_chat_from_non_member_rejected_without_append() {
        // given (precondition): a room the sender never joined
        let mut core = Core::new();
        let (_ann, _ann_rx) = join(&mut core, "study-1", "Ann");
        let (bo, mut bo_rx) = connect(&mut core);

        // when (operation):
        send(
            &mut core,
            bo,
            "chat-message",
            json!({"roomName": "study-1", "text": "intruder"}),
        );

        // then (expected result): error reply, history untouched
        let frames = drain(&mut bo_rx);
        assert_eq!(kinds(&frames), vec!["error"]);
        assert_eq!(
            frames[0]["payload"]["reason"],
            "You are not a member of room 'study-1'"
        );
        assert!(core.rooms.get("study-1").unwrap().chat_history().is_empty());
    }

    #[test]
    fn test_chat_missing_text_rejected() {
        // given (precondition):
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");

        // when (operation): blank text
        send(
            &mut core,
            ann,
            "chat-message",
            json!({"roomName": "study-1", "text": "  "}),
        );

        // then (expected result):
        let frames = drain(&mut ann_rx);
        assert_eq!(kinds(&frames), vec!["error"]);
        assert_eq!(frames[0]["payload"]["reason"], "Message text is required");
    }

    #[test]
    fn test_chat_history_evicts_oldest_past_cap_via_router() {
        // given (precondition):
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");

        // when (operation): one message past the cap
        for i in 0..(CHAT_HISTORY_CAP + 1) {
            send(
                &mut core,
                ann,
                "chat-message",
                json!({"roomName": "study-1", "text": format!("msg-{}", i)}),
            );
        }
        drain(&mut ann_rx);

        // then (expected result):
        let history = core.rooms.get("study-1").unwrap().chat_history();
        assert_eq!(history.len(), CHAT_HISTORY_CAP);
        assert_eq!(history.first().unwrap().text, "msg-1");
    }

    #[test]
    fn test_reaction_is_broadcast_but_not_persisted() {
        // given (precondition):
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        let (_bo, mut bo_rx) = join(&mut core, "study-1", "Bo");
        drain(&mut ann_rx);

        // when (operation):
        send(
            &mut core,
            ann,
            "reaction",
            json!({"roomName": "study-1", "emoji": "🎉"}),
        );

        // then (expected result): everyone sees it, nothing stored
        for rx in [&mut ann_rx, &mut bo_rx] {
            let frames = drain(rx);
            assert_eq!(kinds(&frames), vec!["reaction"]);
            assert_eq!(frames[0]["payload"]["emoji"], "🎉");
            assert_eq!(frames[0]["payload"]["sender"], "Ann");
        }
        assert!(core.rooms.get("study-1").unwrap().chat_history().is_empty());
    }

    #[test]
    fn test_typing_excludes_sender() {
        // given (precondition):
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        let (_bo, mut bo_rx) = join(&mut core, "study-1", "Bo");
        drain(&mut ann_rx);

        // when (operation):
        send(&mut core, ann, "typing", json!({"roomName": "study-1"}));

        // then (expected result):
        assert!(drain(&mut ann_rx).is_empty());
        let frames = drain(&mut bo_rx);
        assert_eq!(kinds(&frames), vec!["typing"]);
        assert_eq!(frames[0]["payload"]["sender"], "Ann");
    }

    #[test]
    fn test_leave_room_notifies_remainder_and_retires_empty_room() {
        // given (precondition): two members, one lobby watcher
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        let (bo, mut bo_rx) = join(&mut core, "study-1", "Bo");
        drain(&mut ann_rx);

        // when (operation): Bo leaves
        send(&mut core, bo, "leave-room", json!({"roomName": "study-1"}));

        // then (expected result): Ann sees the departure, room survives
        let frames = drain(&mut ann_rx);
        assert_eq!(
            kinds(&frames),
            vec!["participant-left", "system-message", "participants-update"]
        );
        assert_eq!(frames[0]["payload"]["id"], bo.0);
        assert_eq!(frames[1]["payload"]["text"], "Bo left the room");
        assert!(core.rooms.room_exists("study-1"));
        drain(&mut bo_rx);

        // and when the last member leaves, the room is retired
        send(&mut core, ann, "leave-room", json!({"roomName": "study-1"}));
        assert!(!core.rooms.room_exists("study-1"));
        assert!(core.connections.get(ann).unwrap().current_room.is_none());
    }

    #[test]
    fn test_leave_room_not_a_member_rejected() {
        // given (precondition):
        let mut core = Core::new();
        let (_ann, _ann_rx) = join(&mut core, "study-1", "Ann");
        let (bo, mut bo_rx) = connect(&mut core);

        // when (operation):
        send(&mut core, bo, "leave-room", json!({"roomName": "study-1"}));

        // then (expected result):
        let frames = drain(&mut bo_rx);
        assert_eq!(kinds(&frames), vec!["error"]);
        assert_eq!(
            frames[0]["payload"]["reason"],
            "You are not a member of room 'study-1'"
        );
        assert_eq!(core.rooms.get("study-1").unwrap().participant_count(), 1);
    }

    #[test]
    fn test_signal_with_target_relays_verbatim_with_sender_id() {
        // given (precondition): Ann and Bo in one room
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        let (bo, mut bo_rx) = join(&mut core, "study-1", "Bo");
        drain(&mut ann_rx);

        // when (operation): Ann sends Bo an offer with an opaque body
        send(
            &mut core,
            ann,
            "signal-offer",
            json!({"targetId": bo.0, "sdp": {"type": "offer", "description": "v=0..."}}),
        );

        // then (expected result): Bo receives it, senderId attached, body intact
        let frames = drain(&mut bo_rx);
        assert_eq!(kinds(&frames), vec!["signal-offer"]);
        let payload = &frames[0]["payload"];
        assert_eq!(payload["senderId"], ann.0);
        assert_eq!(payload["targetId"], bo.0);
        assert_eq!(payload["sdp"]["description"], "v=0...");
        // nothing echoes back to the sender
        assert!(drain(&mut ann_rx).is_empty());
    }

    #[test]
    fn test_signal_to_absent_target_dropped_without_error() {
        // given (precondition):
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");

        // when (operation): target id that is not a participant
        send(
            &mut core,
            ann,
            "signal-ice",
            json!({"targetId": 999, "candidate": "host 10.0.0.1"}),
        );

        // then (expected result): silence, no error frame to the sender
        assert!(drain(&mut ann_rx).is_empty());
    }

    #[test]
    fn test_signal_without_room_is_a_no_op() {
        // given (precondition): a connection that never joined anywhere
        let mut core = Core::new();
        let (ann, mut ann_rx) = connect(&mut core);

        // when (operation):
        send(
            &mut core,
            ann,
            "signal-answer",
            json!({"sdp": {"type": "answer"}}),
        );

        // then (expected result):
        assert!(drain(&mut ann_rx).is_empty());
    }

    #[test]
    fn test_signal_without_target_broadcasts_to_other_participants() {
        // given (precondition): three members
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        let (_bo, mut bo_rx) = join(&mut core, "study-1", "Bo");
        let (_cy, mut cy_rx) = join(&mut core, "study-1", "Cy");
        drain(&mut ann_rx);
        drain(&mut bo_rx);

        // when (operation): Ann sends an untargeted candidate
        send(
            &mut core,
            ann,
            "signal-ice",
            json!({"candidate": "host 10.0.0.1"}),
        );

        // then (expected result): everyone but Ann receives it
        assert!(drain(&mut ann_rx).is_empty());
        for rx in [&mut bo_rx, &mut cy_rx] {
            let frames = drain(rx);
            assert_eq!(kinds(&frames), vec!["signal-ice"]);
            assert_eq!(frames[0]["payload"]["senderId"], ann.0);
        }
    }

    #[test]
    fn test_malformed_and_unknown_frames_are_dropped_silently() {
        // given (precondition):
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");

        // when (operation): garbage, then a well-formed unknown kind
        route_text(&mut core, ann, "{not json");
        route_text(&mut core, ann, r#"{"type":"start-poll","payload":{}}"#);

        // then (expected result): no reply, no crash, state intact
        assert!(drain(&mut ann_rx).is_empty());
        assert!(core.rooms.room_exists("study-1"));
    }

    #[test]
    fn test_identify_updates_future_events_only() {
        // given (precondition): Ann joined under her original name
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        let (_bo, mut bo_rx) = join(&mut core, "study-1", "Bo");
        drain(&mut ann_rx);

        // when (operation): re-identify, then chat
        send(&mut core, ann, "identify", json!({"name": "Annie"}));
        send(
            &mut core,
            ann,
            "chat-message",
            json!({"roomName": "study-1", "text": "hi"}),
        );

        // then (expected result): new chat carries the new name, the roster
        // snapshot taken at join time is unchanged
        let frames = drain(&mut bo_rx);
        assert_eq!(kinds(&frames), vec!["chat-message"]);
        assert_eq!(frames[0]["payload"]["senderName"], "Annie");
        assert_eq!(
            core.rooms.participant_summaries("study-1")[0].name,
            "Ann"
        );
    }

    #[test]
    fn test_unidentified_sender_falls_back_to_user_id() {
        // given (precondition): no identify, no name in the join
        let mut core = Core::new();
        let (ann, mut ann_rx) = connect(&mut core);

        // when (operation):
        send(&mut core, ann, "create-room", json!({"roomName": "study-1"}));

        // then (expected result):
        let frames = drain(&mut ann_rx);
        assert_eq!(
            frames[0]["payload"]["participants"][0]["name"],
            format!("User {}", ann.0)
        );
    }

    #[test]
    fn test_disconnect_scenario_ann_and_bo() {
        // given (precondition): Ann and Bo in "study-1", Ann watches the lobby
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        subscribe_lobby(&mut core, ann);
        let (bo, mut bo_rx) = join(&mut core, "study-1", "Bo");
        drain(&mut ann_rx);

        // Ann chats; both receive it
        send(
            &mut core,
            ann,
            "chat-message",
            json!({"roomName": "study-1", "text": "hello"}),
        );
        let ann_chat = drain(&mut ann_rx);
        let bo_chat = drain(&mut bo_rx);
        for frames in [&ann_chat, &bo_chat] {
            assert_eq!(frames[0]["type"], "chat-message");
            assert_eq!(frames[0]["payload"]["senderName"], "Ann");
            assert_eq!(frames[0]["payload"]["text"], "hello");
        }

        // when (operation): Bo disconnects
        core.disconnect(bo);

        // then (expected result): Ann sees the departure, the updated roster
        // listing only her, and a lobby snapshot with participantCount 1
        let frames = drain(&mut ann_rx);
        assert_eq!(
            kinds(&frames),
            vec![
                "participant-left",
                "system-message",
                "participants-update",
                "room-list-update"
            ]
        );
        assert_eq!(frames[0]["payload"]["id"], bo.0);
        let roster = frames[2]["payload"]["participants"].as_array().unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0]["name"], "Ann");
        let rooms = frames[3]["payload"]["rooms"].as_array().unwrap();
        assert_eq!(rooms[0]["name"], "study-1");
        assert_eq!(rooms[0]["participantCount"], 1);
        assert!(core.connections.get(bo).is_none());
    }

    #[test]
    fn test_disconnect_of_sole_member_retires_room_and_updates_lobby() {
        // given (precondition):
        let mut core = Core::new();
        let (watcher, mut watcher_rx) = connect(&mut core);
        subscribe_lobby(&mut core, watcher);
        let (ann, _ann_rx) = join(&mut core, "study-1", "Ann");
        drain(&mut watcher_rx);

        // when (operation):
        core.disconnect(ann);

        // then (expected result): room gone from the lobby snapshot
        let frames = drain(&mut watcher_rx);
        assert_eq!(kinds(&frames), vec!["room-list-update"]);
        assert!(frames[0]["payload"]["rooms"].as_array().unwrap().is_empty());
        assert!(!core.rooms.room_exists("study-1"));
    }

    #[test]
    fn test_rejoin_supersedes_room_pointer_but_keeps_old_membership() {
        // given (precondition): Ann in "study-1"
        let mut core = Core::new();
        let (ann, mut ann_rx) = join(&mut core, "study-1", "Ann");
        let (_bo, _bo_rx) = join(&mut core, "study-2", "Bo");
        drain(&mut ann_rx);

        // when (operation): Ann joins a second room without leaving
        send(
            &mut core,
            ann,
            "join-room",
            json!({"roomName": "study-2", "name": "Ann"}),
        );

        // then (expected result): pointer moved; the old room keeps its
        // entry until disconnect's defensive full scan removes it
        assert_eq!(
            core.connections.get(ann).unwrap().current_room.as_deref(),
            Some("study-2")
        );
        assert!(core.rooms.get("study-1").unwrap().is_member(ann));

        core.disconnect(ann);
        assert!(!core.rooms.room_exists("study-1"));
        assert!(!core.rooms.get("study-2").unwrap().is_member(ann));
    }
}
