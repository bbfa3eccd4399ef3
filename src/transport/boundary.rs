//! Bounded queues that carry frames and control messages across the
//! boundary between the audio/UI side and the network session.
//!
//! Submitting never blocks: a full queue evicts its oldest item first.
//! Receiving blocks for at most the given timeout so the draining loop can
//! notice the stop signal promptly.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::AudioFrame;
use crate::config::QueueConfig;
use crate::protocol::{ChatMessage, PresenceEvent};

/// Create one drop-oldest queue
pub fn drop_oldest_queue<T>(
    name: &'static str,
    capacity: usize,
    poll_interval: Duration,
) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let producer = QueueProducer {
        name,
        tx,
        evict: rx.clone(),
        dropped: dropped.clone(),
    };
    let consumer = QueueConsumer {
        name,
        rx,
        poll_interval,
        dropped,
    };
    (producer, consumer)
}

/// Submitting half of a boundary queue
pub struct QueueProducer<T> {
    name: &'static str,
    tx: Sender<T>,
    /// Receiver clone used only to evict the head on overflow
    evict: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> QueueProducer<T> {
    /// Enqueue without blocking, evicting the oldest items while full.
    ///
    /// Returns true if anything was evicted.
    pub fn submit(&self, item: T) -> bool {
        let mut item = item;
        let mut evicted = false;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if self.evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted = true;
                        tracing::trace!(queue = self.name, "Evicted oldest item");
                    }
                }
                // Unreachable while `evict` keeps the channel open.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Draining half of a boundary queue
pub struct QueueConsumer<T> {
    name: &'static str,
    rx: Receiver<T>,
    poll_interval: Duration,
    dropped: Arc<AtomicU64>,
}

impl<T> QueueConsumer<T> {
    /// Wait up to `timeout` for an item. `None` on timeout is not an error.
    pub fn receive(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// `receive` with this queue's configured poll interval
    pub fn poll(&self) -> Option<T> {
        self.receive(self.poll_interval)
    }

    pub fn try_receive(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Discard everything queued, returning the count
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Application side of a client boundary: submits outbound traffic and
/// drains inbound traffic
pub struct AppEnd {
    pub audio_out: QueueProducer<AudioFrame>,
    pub chat_out: QueueProducer<String>,
    pub audio_in: QueueConsumer<Vec<f32>>,
    pub chat_in: QueueConsumer<ChatMessage>,
    pub presence_in: QueueConsumer<PresenceEvent>,
}

/// Network side of a client boundary
pub struct NetworkEnd {
    pub audio_out: QueueConsumer<AudioFrame>,
    pub chat_out: QueueConsumer<String>,
    pub audio_in: QueueProducer<Vec<f32>>,
    pub chat_in: QueueProducer<ChatMessage>,
    pub presence_in: QueueProducer<PresenceEvent>,
}

/// Build the five queues of a client boundary
///
/// Audio queues are large with a tight poll; chat and presence are small
/// with a relaxed poll.
pub fn client_boundary(config: &QueueConfig) -> (AppEnd, NetworkEnd) {
    let audio = config.audio_poll();
    let control = config.control_poll();

    let (audio_out_tx, audio_out_rx) = drop_oldest_queue("audio_out", config.audio_capacity, audio);
    let (chat_out_tx, chat_out_rx) = drop_oldest_queue("chat_out", config.control_capacity, control);
    let (audio_in_tx, audio_in_rx) = drop_oldest_queue("audio_in", config.audio_capacity, audio);
    let (chat_in_tx, chat_in_rx) = drop_oldest_queue("chat_in", config.control_capacity, control);
    let (presence_in_tx, presence_in_rx) =
        drop_oldest_queue("presence_in", config.control_capacity, control);

    (
        AppEnd {
            audio_out: audio_out_tx,
            chat_out: chat_out_tx,
            audio_in: audio_in_rx,
            chat_in: chat_in_rx,
            presence_in: presence_in_rx,
        },
        NetworkEnd {
            audio_out: audio_out_rx,
            chat_out: chat_out_rx,
            audio_in: audio_in_tx,
            chat_in: chat_in_tx,
            presence_in: presence_in_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_submit_evicts_oldest() {
        let (tx, rx) = drop_oldest_queue::<u32>("test", 3, Duration::from_millis(5));
        for i in 1..=5 {
            tx.submit(i);
        }
        assert_eq!(tx.dropped_count(), 2);
        let items: Vec<u32> = std::iter::from_fn(|| rx.try_receive()).collect();
        assert_eq!(items, vec![3, 4, 5]);
    }

    #[test]
    fn test_submit_reports_eviction() {
        let (tx, _rx) = drop_oldest_queue::<u32>("test", 1, Duration::from_millis(5));
        assert!(!tx.submit(1));
        assert!(tx.submit(2));
    }

    #[test]
    fn test_receive_times_out_empty() {
        let (_tx, rx) = drop_oldest_queue::<u32>("test", 4, Duration::from_millis(10));
        let start = Instant::now();
        assert_eq!(rx.poll(), None);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_receive_across_threads() {
        let (tx, rx) = drop_oldest_queue::<u32>("test", 16, Duration::from_millis(50));
        let producer = thread::spawn(move || {
            for i in 0..10 {
                tx.submit(i);
            }
        });
        producer.join().unwrap();

        let mut got = Vec::new();
        while let Some(i) = rx.poll() {
            got.push(i);
        }
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_client_boundary_capacities() {
        let config = QueueConfig::default();
        let (app, net) = client_boundary(&config);
        assert_eq!(app.audio_out.capacity(), 1000);
        assert_eq!(app.chat_out.capacity(), 100);
        assert_eq!(net.presence_in.capacity(), 100);
        assert_eq!(net.audio_out.poll_interval(), Duration::from_millis(10));
        assert_eq!(app.chat_in.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_drain() {
        let (tx, rx) = drop_oldest_queue::<u32>("test", 8, Duration::from_millis(5));
        for i in 0..4 {
            tx.submit(i);
        }
        assert_eq!(rx.drain(), 4);
        assert!(rx.is_empty());
    }
}
