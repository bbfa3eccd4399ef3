//! Boundary transport between execution contexts

pub mod boundary;
pub mod signal;

pub use boundary::{client_boundary, drop_oldest_queue, AppEnd, NetworkEnd, QueueConsumer, QueueProducer};
pub use signal::{join_with_timeout, StopSignal};
