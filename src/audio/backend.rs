//! Audio device subsystem seam
//!
//! The pipeline never drives hardware itself. It hands a data callback to an
//! [`AudioBackend`], which invokes it from the audio subsystem's own thread.
//! [`CpalBackend`] is the production implementation; tests use an in-memory
//! backend that calls the callbacks directly.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{find_device, list_devices, Direction};
use crate::error::AudioError;
use crate::protocol::AudioDeviceInfo;

/// How long `open_*_stream` waits for the host thread to report the stream
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Parameters shared by the input and output stream of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per callback
    pub block_size: u32,
    /// Device name, `None` for the host default
    pub device: Option<String>,
}

pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;
pub type StreamErrorCallback = Box<dyn FnMut(AudioError) + Send + 'static>;

/// An open hardware stream. Dropping it also closes it.
pub trait AudioStream: Send {
    /// Stop callbacks and release the OS handle. Idempotent.
    fn close(&mut self);
}

/// The operations the core needs from the platform audio subsystem
pub trait AudioBackend: Send + Sync + 'static {
    fn list_devices(&self) -> Vec<AudioDeviceInfo>;

    fn open_input_stream(
        &self,
        spec: &StreamSpec,
        on_data: InputCallback,
        on_error: StreamErrorCallback,
    ) -> Result<Box<dyn AudioStream>, AudioError>;

    fn open_output_stream(
        &self,
        spec: &StreamSpec,
        on_data: OutputCallback,
        on_error: StreamErrorCallback,
    ) -> Result<Box<dyn AudioStream>, AudioError>;
}

/// cpal-backed audio subsystem
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn stream_config(spec: &StreamSpec) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: spec.channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(spec.block_size),
    }
}

impl AudioBackend for CpalBackend {
    fn list_devices(&self) -> Vec<AudioDeviceInfo> {
        list_devices()
    }

    fn open_input_stream(
        &self,
        spec: &StreamSpec,
        mut on_data: InputCallback,
        mut on_error: StreamErrorCallback,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        let spec = spec.clone();
        spawn_stream("input", move || {
            let device = find_device(spec.device.as_deref(), Direction::Input)?;
            let stream = device.build_input_stream(
                &stream_config(&spec),
                move |data: &[f32], _: &cpal::InputCallbackInfo| on_data(data),
                move |err| on_error(err.into()),
                None,
            )?;
            Ok(stream)
        })
    }

    fn open_output_stream(
        &self,
        spec: &StreamSpec,
        mut on_data: OutputCallback,
        mut on_error: StreamErrorCallback,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        let spec = spec.clone();
        spawn_stream("output", move || {
            let device = find_device(spec.device.as_deref(), Direction::Output)?;
            let stream = device.build_output_stream(
                &stream_config(&spec),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| on_data(data),
                move |err| on_error(err.into()),
                None,
            )?;
            Ok(stream)
        })
    }
}

/// A cpal stream owned by a dedicated host thread
///
/// `cpal::Stream` is not `Send` on every platform, so the stream is built,
/// played and dropped on the thread that owns it.
struct CpalStream {
    label: &'static str,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioStream for CpalStream {
    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!(stream = self.label, "Audio host thread panicked");
            }
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_stream<F>(label: &'static str, build: F) -> Result<Box<dyn AudioStream>, AudioError>
where
    F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let keep_alive = running.clone();
    let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

    let handle = thread::Builder::new()
        .name(format!("audio-{}", label))
        .spawn(move || {
            let stream = match build().and_then(|stream| {
                stream.play()?;
                Ok(stream)
            }) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Keep thread alive while running
            while keep_alive.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(10));
            }

            drop(stream);
            tracing::debug!(stream = label, "Audio stream closed");
        })
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    match ready_rx.recv_timeout(STREAM_OPEN_TIMEOUT) {
        Ok(Ok(())) => Ok(Box::new(CpalStream {
            label,
            running,
            thread: Some(handle),
        })),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            // The host thread exits on its own once the build call returns.
            running.store(false, Ordering::SeqCst);
            Err(AudioError::StreamError(format!(
                "{} stream did not start within {:?}",
                label, STREAM_OPEN_TIMEOUT
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_uses_fixed_block() {
        let spec = StreamSpec {
            sample_rate: 44_100,
            channels: 1,
            block_size: 1764,
            device: None,
        };
        let config = stream_config(&spec);
        assert_eq!(config.sample_rate.0, 44_100);
        assert_eq!(config.channels, 1);
        assert_eq!(config.buffer_size, cpal::BufferSize::Fixed(1764));
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let spec = StreamSpec {
            sample_rate: 44_100,
            channels: 1,
            block_size: 1764,
            device: Some("definitely-not-a-real-device-name".into()),
        };
        let result = CpalBackend::new().open_input_stream(&spec, Box::new(|_| {}), Box::new(|_| {}));
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }
}
