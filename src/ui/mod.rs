//! Presentation seam
//!
//! The core never renders anything. A [`Presenter`] receives inbound audio,
//! chat and presence, and [`VoiceSession`] exposes the user actions.

pub mod session;

pub use session::VoiceSession;

use crate::error::AudioError;

/// Callbacks into the presentation layer
///
/// Invoked from the client's receiver threads, never from an audio
/// callback.
pub trait Presenter: Send + Sync + 'static {
    /// A block of remote audio was queued for playback
    fn on_audio_ready(&self, _samples: &[f32]) {}

    fn on_chat_received(&self, sender: &str, text: &str);

    fn on_presence_changed(&self, name: &str, joined: bool);

    fn on_audio_started(&self) {}

    /// Capture stopped, by request or after a failure
    fn on_audio_stopped(&self) {}

    fn on_audio_error(&self, _error: &AudioError) {}
}
