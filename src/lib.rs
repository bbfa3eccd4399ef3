//! # LAN Voice Rooms
//!
//! Low-latency voice and text chat for participants who share a room code.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── CLIENT ────────────────────────────────┐
//! │                                                                        │
//! │  Microphone ──► input callback ──┐         ┌──► output callback ──► Speaker
//! │                (CaptureMonitor)  │         │    (pops monitor queue,   │
//! │                                  │         │     silence when empty)   │
//! │                                  ▼         │                           │
//! │                     ┌────────────────────────────────┐                 │
//! │                     │   Boundary (bounded queues,    │                 │
//! │                     │   drop-oldest, timed receive)  │                 │
//! │                     │  audio_out  chat_out           │                 │
//! │                     │  audio_in   chat_in  presence  │                 │
//! │                     └────────────────────────────────┘                 │
//! │                                  │         ▲                           │
//! │                                  ▼         │                           │
//! │                     ┌────────────────────────────────┐                 │
//! │                     │ RelayClient (tokio session,    │                 │
//! │                     │ fixed-backoff reconnect)       │                 │
//! │                     └────────────────────────────────┘                 │
//! └──────────────────────────────────│─────────▲───────────────────────────┘
//!                                    │  TCP    │  [u32 len | JSON event]
//!                                    ▼         │
//! ┌──────────────────────────────── SERVER ────────────────────────────────┐
//! │  RelayServer ──► RoomRegistry ──► fan-out to the other members of the  │
//! │  (one task per   (rooms, session→room,      sender's room only         │
//! │   connection)     PresenceTracker)                                      │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod priority;
pub mod protocol;
pub mod rooms;
pub mod transport;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for capture and playback
    pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

    /// Voice is mono
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Duration of one hardware block in milliseconds
    pub const DEFAULT_BLOCK_DURATION_MS: u32 = 40;

    /// Initial monitor gain
    pub const DEFAULT_MONITOR_GAIN: f32 = 0.7;

    /// Capacity of the playback monitor queue (frames)
    pub const MONITOR_QUEUE_CAPACITY: usize = 200;

    /// Capacity of the audio boundary queues (frames)
    pub const AUDIO_QUEUE_CAPACITY: usize = 1000;

    /// Capacity of the chat and presence boundary queues (messages)
    pub const CONTROL_QUEUE_CAPACITY: usize = 100;

    /// Receive timeout of audio boundary loops
    pub const AUDIO_POLL_MS: u64 = 10;

    /// Receive timeout of chat and presence boundary loops
    pub const CONTROL_POLL_MS: u64 = 50;

    /// Default TCP port of the relay
    pub const DEFAULT_RELAY_PORT: u16 = 3500;

    /// Default port of the admin HTTP API
    pub const DEFAULT_HTTP_PORT: u16 = 3580;

    /// Fixed delay between reconnection attempts
    pub const RECONNECT_DELAY_MS: u64 = 1000;

    /// Maximum wire frame payload
    pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

    /// Upper bound on samples in a single voice event (one second at 48 kHz)
    pub const MAX_VOICE_SAMPLES: usize = 48_000;

    /// Longest accepted room code or display name
    pub const MAX_NAME_LEN: usize = 64;
}
