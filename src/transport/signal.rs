//! Cooperative stop signal and bounded thread joins

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// One-shot stop flag observable from threads and async tasks alike
#[derive(Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Async receiver for `select!` loops
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once the signal is raised
    pub async fn stopped(&self) {
        let mut rx = self.subscribe();
        // Sender lives in self, so wait_for only ends once the value is true.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Join `handle` unless it is still running after `timeout`.
///
/// A thread that misses the deadline is detached. Returns whether it joined.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!(
                thread = handle.thread().name().unwrap_or("unnamed"),
                "Worker did not stop in time, detaching"
            );
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    if handle.join().is_err() {
        tracing::warn!("Worker panicked");
    }
    true
}
