//! Error types for the voice relay

use thiserror::Error;

use crate::protocol::SessionId;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Audio callback failed: {0}")]
    CallbackFailed(String),

    #[error("Invalid audio configuration: {0}")]
    InvalidConfig(String),
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::DeviceNotFound(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::StreamError(err.to_string())
    }
}

impl From<cpal::StreamError> for AudioError {
    fn from(err: cpal::StreamError) -> Self {
        AudioError::CallbackFailed(err.to_string())
    }
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Timeout")]
    Timeout,
}

/// Wire-level decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Empty voice frame")]
    EmptyVoiceFrame,

    #[error("Voice frame too large: {0} samples")]
    VoiceFrameTooLarge(usize),
}

/// Room registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Invalid room code: {0:?}")]
    InvalidRoomCode(String),

    #[error("Invalid display name: {0:?}")]
    InvalidDisplayName(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
