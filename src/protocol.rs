//! Wire events and shared data types
//!
//! Every frame on the relay connection carries one JSON envelope of the form
//! `{"event": <name>, "data": <payload>}`. Client and server speak different
//! event sets, so each direction gets its own enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::constants::{MAX_NAME_LEN, MAX_VOICE_SAMPLES};
use crate::error::ProtocolError;

/// Opaque, server-assigned identifier of one connected participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat line, routed by room only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// Membership change as seen by one room member
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceEvent {
    Joined { name: String },
    Left { name: String },
}

impl PresenceEvent {
    pub fn name(&self) -> &str {
        match self {
            PresenceEvent::Joined { name } | PresenceEvent::Left { name } => name,
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, PresenceEvent::Joined { .. })
    }
}

/// Events sent from a client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Announce identity and enter a room
    Join { name: String, room_code: String },
    /// One block of mono samples
    Voice(Vec<f32>),
    ChatMessage(ChatMessage),
    /// Leave the current room but keep the connection
    Leave,
}

/// Events sent from the relay to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Voice(Vec<f32>),
    ChatMessage(ChatMessage),
    NewUser { name: String },
    DisconnectUser { name: String },
    /// Full membership of the room, in join order
    Roster { room_code: String, members: Vec<String> },
}

impl From<PresenceEvent> for ServerEvent {
    fn from(event: PresenceEvent) -> Self {
        match event {
            PresenceEvent::Joined { name } => ServerEvent::NewUser { name },
            PresenceEvent::Left { name } => ServerEvent::DisconnectUser { name },
        }
    }
}

/// Check that a voice payload is a plausible single block
pub fn validate_voice(samples: &[f32]) -> Result<(), ProtocolError> {
    if samples.is_empty() {
        return Err(ProtocolError::EmptyVoiceFrame);
    }
    if samples.len() > MAX_VOICE_SAMPLES {
        return Err(ProtocolError::VoiceFrameTooLarge(samples.len()));
    }
    Ok(())
}

/// Trimmed room code or display name, or `None` if blank or too long
pub fn normalize_label(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Audio device description reported by `list_devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: String,
    pub name: String,
    pub input_channels: u16,
    pub output_channels: u16,
    pub is_default_input: bool,
    pub is_default_output: bool,
    pub sample_rates: Vec<u32>,
}

impl AudioDeviceInfo {
    pub fn is_input(&self) -> bool {
        self.input_channels > 0
    }

    pub fn is_output(&self) -> bool {
        self.output_channels > 0
    }
}

/// Read-only view of a room for the admin API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_code: String,
    pub members: Vec<String>,
}
