//! Audio subsystem module

pub mod backend;
pub mod buffer;
pub mod device;
pub mod pipeline;

pub use backend::{AudioBackend, AudioStream, CpalBackend, StreamSpec};
pub use buffer::{apply_gain, AudioFrame, AudioFrameQueue};
pub use device::list_devices;
pub use pipeline::{CaptureMonitorPipeline, FrameSink, MonitorGain, PipelineCallbacks, PipelineState};
