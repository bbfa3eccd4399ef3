//! User-facing voice session
//!
//! Wires the capture/monitor pipeline to the relay client and exposes the
//! actions a front end offers: mute toggle, chat, device selection and
//! monitor volume. The session starts muted.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::backend::AudioBackend;
use crate::audio::pipeline::{CaptureMonitorPipeline, PipelineCallbacks};
use crate::config::{AppConfig, AudioConfig};
use crate::error::{AudioError, NetworkError};
use crate::network::client::{ConnectionState, RelayClient, RelayHandler};
use crate::protocol::{AudioDeviceInfo, ChatMessage, PresenceEvent};
use crate::ui::Presenter;

/// Routes inbound relay traffic to playback and the presenter
struct SessionHandler {
    pipeline: CaptureMonitorPipeline,
    presenter: Arc<dyn Presenter>,
}

impl RelayHandler for SessionHandler {
    fn on_voice(&self, samples: Vec<f32>) {
        self.pipeline.play(&samples);
        self.presenter.on_audio_ready(&samples);
    }

    fn on_chat(&self, message: ChatMessage) {
        self.presenter.on_chat_received(&message.sender, &message.text);
    }

    fn on_presence(&self, event: PresenceEvent) {
        self.presenter.on_presence_changed(event.name(), event.is_join());
    }
}

pub struct VoiceSession {
    pipeline: CaptureMonitorPipeline,
    client: Mutex<RelayClient>,
    presenter: Arc<dyn Presenter>,
    audio: Mutex<AudioConfig>,
}

impl VoiceSession {
    pub fn new(config: &AppConfig, backend: Arc<dyn AudioBackend>, presenter: Arc<dyn Presenter>) -> Self {
        let client = RelayClient::new(config.client.clone(), &config.queues);

        let callbacks = {
            let started = presenter.clone();
            let stopped = presenter.clone();
            let failed = presenter.clone();
            PipelineCallbacks::new()
                .on_start(move || started.on_audio_started())
                .on_stop(move || stopped.on_audio_stopped())
                .on_error(move |e| failed.on_audio_error(e))
        };
        let pipeline = CaptureMonitorPipeline::with_callbacks(
            backend,
            client.voice_sink(),
            callbacks,
            config.queues.monitor_capacity,
        );
        pipeline.set_monitor_gain(config.audio.monitor_gain);

        Self {
            pipeline,
            client: Mutex::new(client),
            presenter,
            audio: Mutex::new(config.audio.clone()),
        }
    }

    /// Start the relay connection. Audio stays muted.
    pub fn connect(&self) -> Result<(), NetworkError> {
        let handler = Arc::new(SessionHandler {
            pipeline: self.pipeline.clone(),
            presenter: self.presenter.clone(),
        });
        self.client.lock().start(handler)
    }

    /// Start or stop capture. Returns whether the session is now muted.
    pub fn toggle_mute(&self) -> Result<bool, AudioError> {
        if self.pipeline.is_running() {
            self.pipeline.stop();
            tracing::info!("Muted");
            return Ok(true);
        }

        let config = self.audio.lock().clone();
        self.pipeline.start(&config)?;
        tracing::info!("Unmuted");
        Ok(false)
    }

    pub fn is_muted(&self) -> bool {
        !self.pipeline.is_running()
    }

    /// Queue a chat line for the room
    pub fn send_chat(&self, text: &str) -> bool {
        self.client.lock().send_chat(text)
    }

    /// Switch devices by name, `None` meaning the host default. A running
    /// pipeline is restarted on the new devices.
    pub fn select_devices(&self, input: Option<String>, output: Option<String>) -> Result<(), AudioError> {
        let config = {
            let mut audio = self.audio.lock();
            audio.input_device = input;
            audio.output_device = output;
            audio.clone()
        };
        tracing::info!(
            input = config.input_device.as_deref().unwrap_or("default"),
            output = config.output_device.as_deref().unwrap_or("default"),
            "Audio devices selected"
        );

        if self.pipeline.is_running() {
            self.pipeline.stop();
            self.pipeline.start(&config)?;
        }
        Ok(())
    }

    /// Set the monitor volume in percent, clamped to 0..=100
    pub fn set_monitor_volume(&self, percent: u8) -> u8 {
        let percent = percent.min(100);
        let gain = self.pipeline.set_monitor_gain(f32::from(percent) / 100.0);
        self.audio.lock().monitor_gain = gain;
        percent
    }

    pub fn monitor_volume(&self) -> u8 {
        (self.pipeline.monitor_gain() * 100.0).round() as u8
    }

    pub fn list_devices(&self) -> Vec<AudioDeviceInfo> {
        self.pipeline.list_devices()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.lock().state()
    }

    pub fn audio_config(&self) -> AudioConfig {
        self.audio.lock().clone()
    }

    /// Stop capture, then the relay client
    pub fn shutdown(&self) {
        self.pipeline.stop();
        self.client.lock().stop();
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.pipeline.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{AudioStream, InputCallback, OutputCallback, StreamErrorCallback, StreamSpec};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct StubBackend {
        specs: Mutex<Vec<StreamSpec>>,
        reject_input: AtomicBool,
    }

    struct StubStream;

    impl AudioStream for StubStream {
        fn close(&mut self) {}
    }

    impl AudioBackend for StubBackend {
        fn list_devices(&self) -> Vec<AudioDeviceInfo> {
            vec![AudioDeviceInfo {
                id: "Mic".into(),
                name: "Mic".into(),
                input_channels: 1,
                output_channels: 0,
                is_default_input: true,
                is_default_output: false,
                sample_rates: vec![44_100],
            }]
        }

        fn open_input_stream(
            &self,
            spec: &StreamSpec,
            _on_data: InputCallback,
            _on_error: StreamErrorCallback,
        ) -> Result<Box<dyn AudioStream>, AudioError> {
            if self.reject_input.load(Ordering::SeqCst) {
                return Err(AudioError::DeviceNotFound("Mic".into()));
            }
            self.specs.lock().push(spec.clone());
            Ok(Box::new(StubStream))
        }

        fn open_output_stream(
            &self,
            spec: &StreamSpec,
            _on_data: OutputCallback,
            _on_error: StreamErrorCallback,
        ) -> Result<Box<dyn AudioStream>, AudioError> {
            self.specs.lock().push(spec.clone());
            Ok(Box::new(StubStream))
        }
    }

    #[derive(Default)]
    struct Recorder {
        chat: Mutex<Vec<(String, String)>>,
        presence: Mutex<Vec<(String, bool)>>,
        audio_blocks: Mutex<usize>,
        errors: Mutex<Vec<AudioError>>,
        stops: Mutex<usize>,
    }

    impl Presenter for Recorder {
        fn on_audio_ready(&self, _samples: &[f32]) {
            *self.audio_blocks.lock() += 1;
        }

        fn on_chat_received(&self, sender: &str, text: &str) {
            self.chat.lock().push((sender.to_string(), text.to_string()));
        }

        fn on_presence_changed(&self, name: &str, joined: bool) {
            self.presence.lock().push((name.to_string(), joined));
        }

        fn on_audio_stopped(&self) {
            *self.stops.lock() += 1;
        }

        fn on_audio_error(&self, error: &AudioError) {
            self.errors.lock().push(error.clone());
        }
    }

    fn offline_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.client.server_address = "127.0.0.1:1".into();
        config.audio.realtime_priority = false;
        config
    }

    fn session() -> (VoiceSession, Arc<StubBackend>, Arc<Recorder>) {
        let backend = Arc::new(StubBackend::default());
        let presenter = Arc::new(Recorder::default());
        let session = VoiceSession::new(&offline_config(), backend.clone(), presenter.clone());
        (session, backend, presenter)
    }

    #[test]
    fn test_starts_muted_and_toggles() {
        let (session, backend, presenter) = session();
        assert!(session.is_muted());

        assert_eq!(session.toggle_mute(), Ok(false));
        assert!(!session.is_muted());
        assert_eq!(backend.specs.lock().len(), 2);

        assert_eq!(session.toggle_mute(), Ok(true));
        assert!(session.is_muted());
        assert_eq!(*presenter.stops.lock(), 1);
    }

    #[test]
    fn test_device_failure_keeps_session_muted() {
        let (session, backend, presenter) = session();
        backend.reject_input.store(true, Ordering::SeqCst);

        assert!(session.toggle_mute().is_err());
        assert!(session.is_muted());
        assert_eq!(presenter.errors.lock().len(), 1);
    }

    #[test]
    fn test_select_devices_restarts_running_pipeline() {
        let (session, backend, _presenter) = session();
        session.toggle_mute().unwrap();
        session
            .select_devices(Some("USB Mic".into()), Some("Headphones".into()))
            .unwrap();

        let specs = backend.specs.lock();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[2].device.as_deref(), Some("USB Mic"));
        assert_eq!(specs[3].device.as_deref(), Some("Headphones"));
        drop(specs);
        assert!(!session.is_muted());
    }

    #[test]
    fn test_monitor_volume_percent() {
        let (session, _backend, _presenter) = session();
        assert_eq!(session.monitor_volume(), 70);
        assert_eq!(session.set_monitor_volume(150), 100);
        assert_eq!(session.monitor_volume(), 100);
        session.set_monitor_volume(25);
        assert_eq!(session.audio_config().monitor_gain, 0.25);
    }

    #[test]
    fn test_monitor_capacity_comes_from_config() {
        let mut config = AppConfig::from_toml("[queues]\nmonitor_capacity = 5\n").unwrap();
        config.audio.realtime_priority = false;
        let session = VoiceSession::new(
            &config,
            Arc::new(StubBackend::default()),
            Arc::new(Recorder::default()),
        );
        assert_eq!(session.pipeline.monitor_queue().capacity(), 5);
    }

    #[test]
    fn test_handler_routes_to_playback_and_presenter() {
        let (session, _backend, presenter) = session();
        let handler = SessionHandler {
            pipeline: session.pipeline.clone(),
            presenter: presenter.clone(),
        };
        session.toggle_mute().unwrap();

        handler.on_voice(vec![0.5, 0.5]);
        handler.on_chat(ChatMessage::new("Bo", "hi"));
        handler.on_presence(PresenceEvent::Left { name: "Bo".into() });

        assert_eq!(session.pipeline.monitor_queue().len(), 1);
        assert_eq!(*presenter.audio_blocks.lock(), 1);
        assert_eq!(presenter.chat.lock()[0], ("Bo".to_string(), "hi".to_string()));
        assert_eq!(presenter.presence.lock()[0], ("Bo".to_string(), false));
    }

    #[test]
    fn test_shutdown_without_relay() {
        let (session, _backend, _presenter) = session();
        session.connect().unwrap();
        assert!(session.send_chat("anyone there?"));
        assert!(session.connect().is_err());

        session.shutdown();
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.list_devices().len(), 1);
    }
}
