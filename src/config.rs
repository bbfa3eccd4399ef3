//! Application configuration
//!
//! Loaded from a TOML file. Every section has defaults, so both binaries
//! run without any configuration file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::logging::is_valid_level;
use crate::protocol::normalize_label;

/// Complete configuration shared by the client and the relay server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub client: ClientConfig,
    pub server: ServerConfig,
    pub queues: QueueConfig,
    pub logging: LoggingConfig,
}

/// Capture and monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_duration_ms: u32,
    /// Input device name, `None` for the host default
    pub input_device: Option<String>,
    /// Output device name, `None` for the host default
    pub output_device: Option<String>,
    /// Playback gain in [0, 1]
    pub monitor_gain: f32,
    /// Ask the OS for elevated scheduling before opening streams
    pub realtime_priority: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            block_duration_ms: DEFAULT_BLOCK_DURATION_MS,
            input_device: None,
            output_device: None,
            monitor_gain: DEFAULT_MONITOR_GAIN,
            realtime_priority: true,
        }
    }
}

impl AudioConfig {
    /// Frames per hardware block
    pub fn block_size(&self) -> u32 {
        (self.sample_rate as u64 * self.block_duration_ms as u64 / 1000) as u32
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be positive".into()));
        }
        // Network voice is mono and is played back as-is.
        if self.channels != 1 {
            return Err(Error::Config(format!(
                "audio.channels must be 1, got {}",
                self.channels
            )));
        }
        if self.block_duration_ms == 0 || self.block_size() == 0 {
            return Err(Error::Config("audio.block_duration_ms is too small".into()));
        }
        if !(0.0..=1.0).contains(&self.monitor_gain) {
            return Err(Error::Config(format!(
                "audio.monitor_gain must be within [0, 1], got {}",
                self.monitor_gain
            )));
        }
        Ok(())
    }
}

/// Relay client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the relay server
    pub server_address: String,
    pub display_name: String,
    pub room_code: String,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Upper bound on joining worker loops during shutdown
    pub shutdown_timeout_ms: u64,
    /// Events buffered between the sender loops and the socket writer
    pub outbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: format!("127.0.0.1:{}", DEFAULT_RELAY_PORT),
            display_name: String::from("guest"),
            room_code: String::from("lobby"),
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            connect_timeout_ms: 3000,
            shutdown_timeout_ms: 1000,
            outbound_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// The relay rejects joins with blank or overlong labels
    pub fn validate(&self) -> Result<()> {
        if normalize_label(&self.display_name).is_none() {
            return Err(Error::Config(format!(
                "client.display_name must be 1 to {} characters, got {:?}",
                MAX_NAME_LEN, self.display_name
            )));
        }
        if normalize_label(&self.room_code).is_none() {
            return Err(Error::Config(format!(
                "client.room_code must be 1 to {} characters, got {:?}",
                MAX_NAME_LEN, self.room_code
            )));
        }
        if self.outbound_capacity == 0 {
            return Err(Error::Config("client.outbound_capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Relay server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Admin API port, 0 disables it
    pub http_port: u16,
    /// Pending events per session before fan-out starts dropping
    pub outbox_capacity: usize,
    /// Deliver chat back to its sender as well
    pub echo_chat: bool,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: DEFAULT_RELAY_PORT,
            http_port: DEFAULT_HTTP_PORT,
            outbox_capacity: 256,
            echo_chat: true,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn relay_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn http_address(&self) -> Option<String> {
        (self.http_port != 0).then(|| format!("{}:{}", self.bind_address, self.http_port))
    }
}

/// Boundary queue sizes and poll intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub monitor_capacity: usize,
    pub audio_capacity: usize,
    pub control_capacity: usize,
    pub audio_poll_ms: u64,
    pub control_poll_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            monitor_capacity: MONITOR_QUEUE_CAPACITY,
            audio_capacity: AUDIO_QUEUE_CAPACITY,
            control_capacity: CONTROL_QUEUE_CAPACITY,
            audio_poll_ms: AUDIO_POLL_MS,
            control_poll_ms: CONTROL_POLL_MS,
        }
    }
}

impl QueueConfig {
    pub fn audio_poll(&self) -> Duration {
        Duration::from_millis(self.audio_poll_ms)
    }

    pub fn control_poll(&self) -> Duration {
        Duration::from_millis(self.control_poll_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor_capacity == 0 || self.audio_capacity == 0 || self.control_capacity == 0 {
            return Err(Error::Config("queue capacities must be positive".into()));
        }
        if self.audio_poll_ms == 0 || self.control_poll_ms == 0 {
            return Err(Error::Config("queue poll intervals must be positive".into()));
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error; `RUST_LOG` takes precedence
    pub level: String,
    /// text or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if !is_valid_level(&self.level) {
            return Err(Error::Config(format!("unknown logging.level {:?}", self.level)));
        }
        if !matches!(self.format.as_str(), "text" | "json") {
            return Err(Error::Config(format!(
                "logging.format must be text or json, got {:?}",
                self.format
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load from `path`, else from the platform config dir, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// `<config dir>/lan-voice-rooms/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "lan-voice-rooms", "lan-voice-rooms")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.client.validate()?;
        self.queues.validate()?;
        self.logging.validate()?;
        if self.server.outbox_capacity == 0 {
            return Err(Error::Config("server.outbox_capacity must be positive".into()));
        }
        Ok(())
    }
}
