//! Capture and local monitor pipeline
//!
//! Owns one input and one output stream opened at the same sample rate and
//! block size. The input callback copies each block into an [`AudioFrame`]
//! and submits it to a [`FrameSink`]. The output callback pops the monitor
//! queue and plays silence when nothing is queued. Neither callback blocks.
//!
//! Stream failures, whether at open time or from inside a callback, are
//! reported through the error callback and stop the pipeline. A supervisor
//! thread performs the stop so that callbacks never tear down their own
//! stream.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::backend::{AudioBackend, AudioStream, StreamSpec};
use crate::audio::buffer::{apply_gain, AudioFrame, AudioFrameQueue};
use crate::config::AudioConfig;
use crate::constants::{DEFAULT_MONITOR_GAIN, MONITOR_QUEUE_CAPACITY};
use crate::error::AudioError;
use crate::priority::request_realtime_priority;
use crate::protocol::AudioDeviceInfo;
use crate::transport::{join_with_timeout, QueueProducer};

const SUPERVISOR_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Faults buffered between the callbacks and the supervisor
const FAULT_CAPACITY: usize = 8;

/// Monitor gain shared with the callback threads
///
/// Stored as the bit pattern of an `f32` so readers never observe a torn
/// value.
#[derive(Debug)]
pub struct MonitorGain(AtomicU32);

impl MonitorGain {
    pub fn new(gain: f32) -> Self {
        Self(AtomicU32::new(gain.clamp(0.0, 1.0).to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Store `gain` clamped to [0, 1] and return the stored value
    pub fn set(&self, gain: f32) -> f32 {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        self.0.store(gain.to_bits(), Ordering::Release);
        gain
    }
}

impl Default for MonitorGain {
    fn default() -> Self {
        Self::new(DEFAULT_MONITOR_GAIN)
    }
}

/// Outward destination of captured frames
///
/// Called from the input callback, so implementations must not block.
pub trait FrameSink: Send + Sync {
    fn submit(&self, frame: AudioFrame) -> Result<(), AudioError>;
}

impl FrameSink for QueueProducer<AudioFrame> {
    fn submit(&self, frame: AudioFrame) -> Result<(), AudioError> {
        QueueProducer::submit(self, frame);
        Ok(())
    }
}

pub type StateCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&AudioError) + Send + Sync>;

/// Notifications for the presentation layer
#[derive(Clone, Default)]
pub struct PipelineCallbacks {
    on_start: Option<StateCallback>,
    on_stop: Option<StateCallback>,
    on_error: Option<ErrorCallback>,
}

impl PipelineCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_stop(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&AudioError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
}

/// Fill one output block from the monitor queue
///
/// A shorter frame is zero-padded and a longer one truncated. Returns false
/// when the queue was empty and the block is silence.
pub fn fill_output_block(queue: &AudioFrameQueue, out: &mut [f32]) -> bool {
    match queue.pop() {
        Some(frame) => {
            let samples = frame.samples();
            let n = samples.len().min(out.len());
            out[..n].copy_from_slice(&samples[..n]);
            out[n..].fill(0.0);
            true
        }
        None => {
            out.fill(0.0);
            false
        }
    }
}

struct RunningStreams {
    generation: u64,
    input: Box<dyn AudioStream>,
    output: Box<dyn AudioStream>,
    /// Dropped on stop to release the supervisor
    shutdown: Sender<()>,
    supervisor: Option<JoinHandle<()>>,
}

struct Inner {
    backend: Arc<dyn AudioBackend>,
    monitor: Arc<AudioFrameQueue>,
    gain: MonitorGain,
    sink: Arc<dyn FrameSink>,
    callbacks: PipelineCallbacks,
    run: Mutex<Option<RunningStreams>>,
    active: AtomicBool,
    generation: AtomicU64,
    captured: Arc<AtomicU64>,
}

impl Inner {
    fn report(&self, err: &AudioError) {
        if let Some(cb) = &self.callbacks.on_error {
            cb(err);
        }
    }

    /// Stop the current run, or only run `generation` when given
    fn stop(&self, generation: Option<u64>) -> bool {
        let running = {
            let mut run = self.run.lock();
            match run.as_ref() {
                Some(r) if generation.map_or(true, |g| g == r.generation) => run.take(),
                _ => None,
            }
        };
        let Some(RunningStreams {
            mut input,
            mut output,
            shutdown,
            supervisor,
            ..
        }) = running
        else {
            return false;
        };

        self.active.store(false, Ordering::SeqCst);
        input.close();
        output.close();
        drop(shutdown);
        let drained = self.monitor.clear();
        let underruns = self.monitor.underrun_count();

        if let Some(handle) = supervisor {
            if handle.thread().id() != thread::current().id() {
                join_with_timeout(handle, SUPERVISOR_JOIN_TIMEOUT);
            }
        }

        tracing::info!(drained, underruns, "Audio pipeline stopped");
        if let Some(cb) = &self.callbacks.on_stop {
            cb();
        }
        true
    }
}

/// Handle to the capture/monitor pipeline. Clones share one pipeline.
#[derive(Clone)]
pub struct CaptureMonitorPipeline {
    inner: Arc<Inner>,
}

impl CaptureMonitorPipeline {
    pub fn new(backend: Arc<dyn AudioBackend>, sink: Arc<dyn FrameSink>) -> Self {
        Self::with_callbacks(backend, sink, PipelineCallbacks::default(), MONITOR_QUEUE_CAPACITY)
    }

    /// `monitor_capacity` bounds the frames queued for local playback
    pub fn with_callbacks(
        backend: Arc<dyn AudioBackend>,
        sink: Arc<dyn FrameSink>,
        callbacks: PipelineCallbacks,
        monitor_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                monitor: Arc::new(AudioFrameQueue::new(monitor_capacity)),
                gain: MonitorGain::default(),
                sink,
                callbacks,
                run: Mutex::new(None),
                active: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                captured: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Open both streams and begin capturing. A no-op while running.
    pub fn start(&self, config: &AudioConfig) -> Result<(), AudioError> {
        let result = self.open(config);
        match &result {
            Ok(true) => {
                if let Some(cb) = &self.inner.callbacks.on_start {
                    cb();
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to start audio pipeline");
                self.inner.report(e);
            }
        }
        result.map(|_| ())
    }

    /// Returns true if streams were opened by this call
    fn open(&self, config: &AudioConfig) -> Result<bool, AudioError> {
        let inner = &self.inner;
        let mut run = inner.run.lock();
        if run.is_some() {
            return Ok(false);
        }

        config
            .validate()
            .map_err(|e| AudioError::InvalidConfig(e.to_string()))?;
        inner.gain.set(config.monitor_gain);

        if config.realtime_priority && !request_realtime_priority() {
            tracing::debug!("Realtime priority not granted, continuing at normal priority");
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (fault_tx, fault_rx) = bounded::<AudioError>(FAULT_CAPACITY);
        let block_size = config.block_size();

        let input_spec = StreamSpec {
            sample_rate: config.sample_rate,
            channels: config.channels,
            block_size,
            device: config.input_device.clone(),
        };
        let output_spec = StreamSpec {
            device: config.output_device.clone(),
            ..input_spec.clone()
        };

        let input = {
            let sink = inner.sink.clone();
            let captured = inner.captured.clone();
            let faults = fault_tx.clone();
            let stream_faults = fault_tx.clone();
            let channels = config.channels;
            let sample_rate = config.sample_rate as u64;
            let mut sequence = 0u64;
            let mut frames_seen = 0u64;
            let mut failed = false;

            inner.backend.open_input_stream(
                &input_spec,
                Box::new(move |data: &[f32]| {
                    if failed {
                        return;
                    }
                    let timestamp = frames_seen * 1_000_000 / sample_rate;
                    frames_seen += (data.len() / channels.max(1) as usize) as u64;
                    let frame = AudioFrame::new(data.to_vec(), channels, timestamp, sequence);
                    sequence += 1;
                    match sink.submit(frame) {
                        Ok(()) => {
                            captured.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            failed = true;
                            let _ = faults.try_send(e);
                        }
                    }
                }),
                Box::new(move |err| {
                    let _ = stream_faults.try_send(err);
                }),
            )?
        };

        let output = {
            let monitor = inner.monitor.clone();
            let faults = fault_tx.clone();
            let opened = inner.backend.open_output_stream(
                &output_spec,
                Box::new(move |out: &mut [f32]| {
                    fill_output_block(&monitor, out);
                }),
                Box::new(move |err| {
                    let _ = faults.try_send(err);
                }),
            );
            match opened {
                Ok(stream) => stream,
                Err(e) => {
                    let mut input = input;
                    input.close();
                    return Err(e);
                }
            }
        };
        drop(fault_tx);

        let (shutdown, shutdown_rx) = bounded::<()>(0);
        let supervisor = spawn_supervisor(Arc::downgrade(inner), generation, fault_rx, shutdown_rx);
        let supervisor = match supervisor {
            Ok(handle) => handle,
            Err(e) => {
                let (mut input, mut output) = (input, output);
                input.close();
                output.close();
                return Err(e);
            }
        };

        *run = Some(RunningStreams {
            generation,
            input,
            output,
            shutdown,
            supervisor: Some(supervisor),
        });
        inner.active.store(true, Ordering::SeqCst);

        tracing::info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            block_size,
            input = config.input_device.as_deref().unwrap_or("default"),
            output = config.output_device.as_deref().unwrap_or("default"),
            "Audio pipeline started"
        );
        Ok(true)
    }

    /// Close both streams and drain the monitor queue. Safe to call
    /// repeatedly and from any thread.
    pub fn stop(&self) {
        self.inner.stop(None);
    }

    /// Queue a block of remote audio for local playback, applying the
    /// current gain. Ignored while idle.
    pub fn play(&self, samples: &[f32]) {
        if !self.is_running() || samples.is_empty() {
            return;
        }
        let scaled = apply_gain(samples, self.inner.gain.get());
        self.inner.monitor.push(AudioFrame::from_samples(scaled));
    }

    pub fn set_monitor_gain(&self, gain: f32) -> f32 {
        self.inner.gain.set(gain)
    }

    pub fn monitor_gain(&self) -> f32 {
        self.inner.gain.get()
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PipelineState {
        if self.is_running() {
            PipelineState::Running
        } else {
            PipelineState::Idle
        }
    }

    pub fn monitor_queue(&self) -> &AudioFrameQueue {
        &self.inner.monitor
    }

    /// Frames handed to the sink since creation
    pub fn captured_frames(&self) -> u64 {
        self.inner.captured.load(Ordering::Relaxed)
    }

    pub fn list_devices(&self) -> Vec<AudioDeviceInfo> {
        self.inner.backend.list_devices()
    }
}

fn spawn_supervisor(
    inner: Weak<Inner>,
    generation: u64,
    faults: Receiver<AudioError>,
    shutdown: Receiver<()>,
) -> Result<JoinHandle<()>, AudioError> {
    thread::Builder::new()
        .name("audio-supervisor".into())
        .spawn(move || {
            select! {
                recv(faults) -> fault => {
                    let Ok(err) = fault else { return };
                    let Some(inner) = inner.upgrade() else { return };
                    tracing::error!(error = %err, "Audio stream failed, stopping pipeline");
                    inner.stop(Some(generation));
                    inner.report(&err);
                }
                recv(shutdown) -> _ => {}
            }
        })
        .map_err(|e| AudioError::StreamError(e.to_string()))
}
