//! Room registry: session-to-room mapping and in-room fan-out
//!
//! All membership state lives behind one mutex. Deliveries use `try_send`
//! on each session's bounded outbox, so a slow member loses events instead
//! of stalling the room. Sending under the lock keeps every member's view
//! of presence ordered the same way as the registry's own changes.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::error::RoomError;
use crate::protocol::{normalize_label, ChatMessage, RoomSnapshot, ServerEvent, SessionId};
use crate::rooms::presence::PresenceTracker;

/// Per-session queue of events waiting to be written to its socket
pub type Outbox = mpsc::Sender<ServerEvent>;

#[derive(Debug, Clone)]
struct Membership {
    room_code: String,
    name: String,
}

struct SessionEntry {
    outbox: Outbox,
    membership: Option<Membership>,
}

#[derive(Default)]
struct Room {
    /// Join order
    members: Vec<SessionId>,
}

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<String, Room>,
    sessions: HashMap<SessionId, SessionEntry>,
}

impl RegistryState {
    fn member_names(&self, room: &Room) -> Vec<String> {
        room.members
            .iter()
            .filter_map(|id| self.sessions.get(id))
            .filter_map(|entry| entry.membership.as_ref().map(|m| m.name.clone()))
            .collect()
    }
}

/// Routing counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    voice_routed: AtomicU64,
    voice_delivered: AtomicU64,
    chat_routed: AtomicU64,
    chat_delivered: AtomicU64,
    orphan_dropped: AtomicU64,
    outbox_dropped: AtomicU64,
    rooms_reclaimed: AtomicU64,
}

/// Point-in-time copy of [`RegistryStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStatsSnapshot {
    pub voice_routed: u64,
    pub voice_delivered: u64,
    pub chat_routed: u64,
    pub chat_delivered: u64,
    pub orphan_dropped: u64,
    pub outbox_dropped: u64,
    pub rooms_reclaimed: u64,
}

impl RegistryStats {
    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            voice_routed: self.voice_routed.load(Ordering::Relaxed),
            voice_delivered: self.voice_delivered.load(Ordering::Relaxed),
            chat_routed: self.chat_routed.load(Ordering::Relaxed),
            chat_delivered: self.chat_delivered.load(Ordering::Relaxed),
            orphan_dropped: self.orphan_dropped.load(Ordering::Relaxed),
            outbox_dropped: self.outbox_dropped.load(Ordering::Relaxed),
            rooms_reclaimed: self.rooms_reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Owner of all rooms and sessions on the relay
pub struct RoomRegistry {
    state: Mutex<RegistryState>,
    presence: PresenceTracker,
    /// Whether chat is also delivered back to its sender
    echo_chat: bool,
    stats: RegistryStats,
}

impl RoomRegistry {
    pub fn new(echo_chat: bool) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            presence: PresenceTracker::new(),
            echo_chat,
            stats: RegistryStats::default(),
        }
    }

    /// Register a connected session that has not joined a room yet
    pub fn connect(&self, id: SessionId, outbox: Outbox) {
        let mut state = self.state.lock();
        state.sessions.insert(
            id,
            SessionEntry {
                outbox,
                membership: None,
            },
        );
        tracing::debug!(session = %id, "Session connected");
    }

    /// Put a session in `room_code` under `name`, leaving its previous room
    /// first. Every member, the newcomer included, receives the join and
    /// the full roster.
    pub fn join(&self, id: SessionId, room_code: &str, name: &str) -> Result<(), RoomError> {
        let room_code =
            normalize_label(room_code).ok_or_else(|| RoomError::InvalidRoomCode(room_code.to_string()))?;
        let name = normalize_label(name).ok_or_else(|| RoomError::InvalidDisplayName(name.to_string()))?;

        let mut state = self.state.lock();
        let current = match state.sessions.get(&id) {
            Some(entry) => entry.membership.clone(),
            None => return Err(RoomError::UnknownSession(id)),
        };
        if let Some(current) = current {
            if current.room_code == room_code && current.name == name {
                return Ok(());
            }
            self.leave_locked(&mut state, id);
        }

        state.rooms.entry(room_code.clone()).or_default().members.push(id);
        if let Some(entry) = state.sessions.get_mut(&id) {
            entry.membership = Some(Membership {
                room_code: room_code.clone(),
                name: name.clone(),
            });
        }

        let Some(room) = state.rooms.get(&room_code) else {
            return Ok(());
        };
        let names = state.member_names(room);
        let member_count = names.len();
        for event in self.presence.joined(&room_code, &name, names) {
            self.deliver_all(&state, &room.members, None, &event);
        }

        tracing::info!(session = %id, room = %room_code, name = %name, members = member_count, "Joined room");
        Ok(())
    }

    /// Remove a session from its room. Unknown or roomless sessions are a
    /// no-op. Returns whether membership changed.
    pub fn leave(&self, id: SessionId) -> bool {
        let mut state = self.state.lock();
        self.leave_locked(&mut state, id)
    }

    /// Leave and forget the session entirely
    pub fn disconnect(&self, id: SessionId) -> bool {
        let mut state = self.state.lock();
        self.leave_locked(&mut state, id);
        let known = state.sessions.remove(&id).is_some();
        if known {
            tracing::debug!(session = %id, "Session disconnected");
        }
        known
    }

    fn leave_locked(&self, state: &mut RegistryState, id: SessionId) -> bool {
        let Some(membership) = state.sessions.get_mut(&id).and_then(|e| e.membership.take()) else {
            return false;
        };
        let code = membership.room_code;

        let now_empty = match state.rooms.get_mut(&code) {
            Some(room) => {
                room.members.retain(|m| *m != id);
                room.members.is_empty()
            }
            None => false,
        };

        if now_empty {
            state.rooms.remove(&code);
            self.stats.rooms_reclaimed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(room = %code, "Reclaimed empty room");
        } else if let Some(room) = state.rooms.get(&code) {
            let names = state.member_names(room);
            for event in self.presence.left(&code, &membership.name, names) {
                self.deliver_all(state, &room.members, None, &event);
            }
        }

        tracing::info!(session = %id, room = %code, name = %membership.name, "Left room");
        true
    }

    /// Forward a voice block to the other members of the sender's room.
    /// Returns the number of deliveries.
    pub fn route_voice(&self, id: SessionId, samples: Vec<f32>) -> usize {
        self.stats.voice_routed.fetch_add(1, Ordering::Relaxed);
        let state = self.state.lock();
        let Some((room, _)) = self.room_for(&state, id) else {
            self.stats.orphan_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(session = %id, "Dropped voice from session without a room");
            return 0;
        };

        let delivered = self.deliver_all(&state, &room.members, Some(id), &ServerEvent::Voice(samples));
        self.stats.voice_delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Stamp `text` with the sender's display name and forward it to the
    /// room. Returns the number of deliveries.
    pub fn route_chat(&self, id: SessionId, text: String) -> usize {
        self.stats.chat_routed.fetch_add(1, Ordering::Relaxed);
        let state = self.state.lock();
        let Some((room, sender)) = self.room_for(&state, id) else {
            self.stats.orphan_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session = %id, "Dropped chat from session without a room");
            return 0;
        };

        let skip = if self.echo_chat { None } else { Some(id) };
        let event = ServerEvent::ChatMessage(ChatMessage::new(sender, text));
        let delivered = self.deliver_all(&state, &room.members, skip, &event);
        self.stats.chat_delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    fn room_for<'a>(&self, state: &'a RegistryState, id: SessionId) -> Option<(&'a Room, String)> {
        let membership = state.sessions.get(&id)?.membership.as_ref()?;
        let room = state.rooms.get(&membership.room_code)?;
        Some((room, membership.name.clone()))
    }

    fn deliver_all(
        &self,
        state: &RegistryState,
        members: &[SessionId],
        skip: Option<SessionId>,
        event: &ServerEvent,
    ) -> usize {
        let mut delivered = 0;
        for member in members {
            if Some(*member) == skip {
                continue;
            }
            let Some(entry) = state.sessions.get(member) else {
                continue;
            };
            match entry.outbox.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.stats.outbox_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(session = %member, "Outbox full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::trace!(session = %member, "Outbox closed");
                }
            }
        }
        delivered
    }

    pub fn room_of(&self, id: SessionId) -> Option<String> {
        let state = self.state.lock();
        state
            .sessions
            .get(&id)
            .and_then(|e| e.membership.as_ref())
            .map(|m| m.room_code.clone())
    }

    /// Display names in `room_code`, in join order
    pub fn members(&self, room_code: &str) -> Option<Vec<String>> {
        let state = self.state.lock();
        state.rooms.get(room_code).map(|room| state.member_names(room))
    }

    /// All non-empty rooms, sorted by code
    pub fn rooms(&self) -> Vec<RoomSnapshot> {
        let state = self.state.lock();
        let mut rooms: Vec<RoomSnapshot> = state
            .rooms
            .iter()
            .map(|(code, room)| RoomSnapshot {
                room_code: code.clone(),
                members: state.member_names(room),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_code.cmp(&b.room_code));
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}
