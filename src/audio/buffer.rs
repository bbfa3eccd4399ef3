//! Drop-oldest audio frame queue
//!
//! Both ends of this queue are touched from hardware callbacks, so neither
//! `push` nor `pop` may block. When the queue is full the oldest frame is
//! evicted to make room: the most recent audio is the most relevant, and
//! evicting at the head keeps added latency bounded by the capacity.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// One block of captured or to-be-played samples
///
/// Frames are immutable once built. Gain produces a new frame instead of
/// touching samples a producer may still hold.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    channels: u16,
    /// Microseconds since the producing stream started
    timestamp: u64,
    sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, timestamp: u64, sequence: u64) -> Self {
        Self {
            samples,
            channels,
            timestamp,
            sequence,
        }
    }

    /// Mono frame without timing metadata, used for network audio
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self::new(samples, 1, 0, 0)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

}

/// Scale samples and clamp the result to the valid sample range
pub fn apply_gain(samples: &[f32], gain: f32) -> Vec<f32> {
    samples
        .iter()
        .map(|s| (s * gain).clamp(-1.0, 1.0))
        .collect()
}

/// Bounded FIFO of audio frames with drop-oldest overflow
pub struct AudioFrameQueue {
    queue: ArrayQueue<AudioFrame>,
    dropped: AtomicU64,
    underruns: AtomicU64,
}

impl AudioFrameQueue {
    /// Create a queue holding at most `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    /// Insert a frame, evicting the oldest one if the queue is full.
    ///
    /// Returns true if a frame was evicted.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.force_push(frame) {
            Some(_evicted) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Take the oldest frame; counts an underrun when empty
    pub fn pop(&self) -> Option<AudioFrame> {
        let frame = self.queue.pop();
        if frame.is_none() {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Try to pop without counting underrun
    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Discard everything queued, returning how many frames were removed
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        while self.queue.pop().is_some() {
            removed += 1;
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Frames evicted by overflow since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(vec![0.0; 4], 1, seq * 40_000, seq)
    }

    #[test]
    fn test_fifo_without_overflow() {
        let queue = AudioFrameQueue::new(4);
        for seq in 0..3 {
            assert!(!queue.push(frame(seq)));
        }
        assert_eq!(queue.len(), 3);

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop().map(|f| f.sequence())).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(queue.dropped_count(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = AudioFrameQueue::new(200);
        for seq in 1..=205 {
            queue.push(frame(seq));
        }
        assert_eq!(queue.len(), 200);
        assert_eq!(queue.dropped_count(), 5);

        let drained: Vec<u64> = std::iter::from_fn(|| queue.try_pop().map(|f| f.sequence())).collect();
        assert_eq!(drained, (6..=205).collect::<Vec<_>>());
    }

    #[test]
    fn test_pop_on_empty_counts_underrun() {
        let queue = AudioFrameQueue::new(2);
        assert!(queue.pop().is_none());
        assert!(queue.try_pop().is_none());
        assert_eq!(queue.underrun_count(), 1);
    }

    #[test]
    fn test_clear_reports_removed() {
        let queue = AudioFrameQueue::new(8);
        for seq in 0..5 {
            queue.push(frame(seq));
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_apply_gain_leaves_input_untouched() {
        let original = vec![0.5f32, -0.5, 1.0];
        let scaled = apply_gain(&original, 0.5);
        assert_eq!(original, vec![0.5, -0.5, 1.0]);
        assert_eq!(scaled, vec![0.25, -0.25, 0.5]);
    }

    proptest! {
        #[test]
        fn prop_queue_keeps_most_recent(capacity in 1usize..64, pushes in 0u64..300) {
            let queue = AudioFrameQueue::new(capacity);
            for seq in 0..pushes {
                queue.push(frame(seq));
                prop_assert!(queue.len() <= capacity);
            }
            let kept: Vec<u64> = std::iter::from_fn(|| queue.try_pop().map(|f| f.sequence())).collect();
            let start = pushes.saturating_sub(capacity as u64);
            prop_assert_eq!(kept, (start..pushes).collect::<Vec<_>>());
        }

        #[test]
        fn prop_gain_stays_in_range(
            samples in proptest::collection::vec(-1.0f32..=1.0, 0..256),
            gain in 0.0f32..=1.0,
        ) {
            for s in apply_gain(&samples, gain) {
                prop_assert!((-1.0..=1.0).contains(&s));
            }
        }
    }
}
