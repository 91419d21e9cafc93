//! Bounded FIFO of frame handles for one camera

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use tracing::warn;

use crate::capture::Frame;

/// Ring buffer of frame handles (not the pixel data itself)
///
/// A full queue never drops: the rejected frame is handed back to the caller.
pub struct FrameQueue {
    ring: HeapRb<Frame>,
    last_sequence: Option<u64>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_pushed: AtomicUsize,
    frames_popped: AtomicUsize,
    overflows: AtomicUsize,
}

/// Snapshot of one queue's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: usize,
    pub popped: usize,
    pub overflows: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            last_sequence: None,
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: append a frame, returning it back if the queue is full.
    pub fn push(&mut self, frame: Frame) -> Result<(), Frame> {
        let sequence = frame.sequence();
        if let Err(frame) = self.ring.try_push(frame) {
            self.stats.overflows.fetch_add(1, Ordering::Relaxed);
            return Err(frame);
        }

        if let Some(last) = self.last_sequence {
            if sequence <= last {
                warn!(last, sequence, "Sequence went backwards");
            }
        }
        self.last_sequence = Some(sequence);
        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Consumer: pop the oldest frame.
    pub fn pop(&mut self) -> Option<Frame> {
        let frame = self.ring.try_pop()?;
        self.stats.frames_popped.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Drop every queued frame, keeping the statistics.
    pub fn clear(&mut self) {
        while self.ring.try_pop().is_some() {}
        self.last_sequence = None;
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.stats.frames_pushed.load(Ordering::Relaxed),
            popped: self.stats.frames_popped.load(Ordering::Relaxed),
            overflows: self.stats.overflows.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use bytes::Bytes;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            Bytes::from_static(&[0, 0, 0]),
            FrameMetadata {
                sequence,
                width: 1,
                height: 1,
                stride: 3,
                format: PixelFormat::Bgr24,
                device_timestamp: None,
            },
        )
    }

    #[test]
    fn pops_in_push_order() {
        let mut queue = FrameQueue::new(4);
        for id in 1..=3 {
            queue.push(frame(id)).unwrap();
        }
        let ids: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|f| f.sequence()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_hands_the_frame_back() {
        let mut queue = FrameQueue::new(2);
        queue.push(frame(1)).unwrap();
        queue.push(frame(2)).unwrap();

        let rejected = queue.push(frame(3)).unwrap_err();
        assert_eq!(rejected.sequence(), 3);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().sequence(), 1);

        let stats = queue.stats();
        assert_eq!(stats.pushed, 2);
        assert_eq!(stats.popped, 1);
        assert_eq!(stats.overflows, 1);
    }

    #[test]
    fn out_of_order_ids_are_kept_as_delivered() {
        let mut queue = FrameQueue::new(4);
        for id in [1, 3, 2] {
            queue.push(frame(id)).unwrap();
        }
        let ids: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|f| f.sequence()).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(frame(1)).unwrap();
        queue.clear();
        assert!(queue.is_empty());
    }
}
