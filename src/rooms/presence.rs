//! Join/leave notifications
//!
//! [`PresenceTracker`] runs on the server and turns membership changes into
//! the events broadcast to a room. [`RosterView`] runs on the client and
//! folds those events back into [`PresenceEvent`]s, one per name whose
//! presence actually changed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::{PresenceEvent, ServerEvent};

/// Builds presence broadcasts for the room registry
#[derive(Debug, Default)]
pub struct PresenceTracker {
    joins: AtomicU64,
    leaves: AtomicU64,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events sent to every member, the newcomer included, after `name`
    /// joined. `members` is the roster after the join.
    pub fn joined(&self, room_code: &str, name: &str, members: Vec<String>) -> [ServerEvent; 2] {
        self.joins.fetch_add(1, Ordering::Relaxed);
        [
            PresenceEvent::Joined { name: name.to_string() }.into(),
            ServerEvent::Roster {
                room_code: room_code.to_string(),
                members,
            },
        ]
    }

    /// Events sent to the remaining members after `name` left
    pub fn left(&self, room_code: &str, name: &str, members: Vec<String>) -> [ServerEvent; 2] {
        self.leaves.fetch_add(1, Ordering::Relaxed);
        [
            PresenceEvent::Left { name: name.to_string() }.into(),
            ServerEvent::Roster {
                room_code: room_code.to_string(),
                members,
            },
        ]
    }

    pub fn join_count(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }

    pub fn leave_count(&self) -> u64 {
        self.leaves.load(Ordering::Relaxed)
    }
}

/// Client-side view of the current room's members
///
/// Display names are not unique, so each name is counted.
#[derive(Debug, Default, Clone)]
pub struct RosterView {
    members: BTreeMap<String, usize>,
}

impl RosterView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one inbound server event and return the resulting presence
    /// changes. Non-presence events yield nothing.
    pub fn apply(&mut self, event: &ServerEvent) -> Vec<PresenceEvent> {
        match event {
            ServerEvent::NewUser { name } => {
                let count = self.members.entry(name.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    vec![PresenceEvent::Joined { name: name.clone() }]
                } else {
                    Vec::new()
                }
            }
            ServerEvent::DisconnectUser { name } => match self.members.get_mut(name) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    Vec::new()
                }
                Some(_) => {
                    self.members.remove(name);
                    vec![PresenceEvent::Left { name: name.clone() }]
                }
                None => Vec::new(),
            },
            ServerEvent::Roster { members, .. } => {
                let mut next: BTreeMap<String, usize> = BTreeMap::new();
                for name in members {
                    *next.entry(name.clone()).or_insert(0) += 1;
                }

                let mut changes: Vec<PresenceEvent> = self
                    .members
                    .keys()
                    .filter(|name| !next.contains_key(*name))
                    .map(|name| PresenceEvent::Left { name: name.clone() })
                    .collect();
                changes.extend(
                    next.keys()
                        .filter(|name| !self.members.contains_key(*name))
                        .map(|name| PresenceEvent::Joined { name: name.clone() }),
                );

                self.members = next;
                changes
            }
            ServerEvent::Voice(_) | ServerEvent::ChatMessage(_) => Vec::new(),
        }
    }

    /// Names currently present, sorted, one entry per distinct name
    pub fn members(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }
}
