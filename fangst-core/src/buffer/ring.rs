//! Byte-accounted FIFO ring buffer for the capture persistence path.
//!
//! Multiple capture sources push captured chunks; a single exporter drain
//! loop pops them. The buffer is the one point of mutual exclusion between
//! producers and the consumer, so a plain mutexed deque with an atomic
//! occupancy counter is used rather than a lock-free SPSC ring.
//!
//! A push that would exceed capacity is rejected with [`BufferError::Full`];
//! data is never silently truncated or dropped here. Overflow policy lives
//! with the exporter, where it can be logged and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

/// Fraction of capacity at which producers get the pause signal.
///
/// Kept below 1.0 so producers see backpressure before the buffer is hard
/// full. Tunable per buffer via [`RingBuffer::with_ratio`].
pub const BACKPRESSURE_RATIO: f64 = 0.8;

/// Buffer error conditions.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error(
        "push of {attempted} bytes would exceed buffer capacity \
         ({occupied}/{capacity} bytes occupied)"
    )]
    Full {
        attempted: usize,
        occupied: usize,
        capacity: usize,
    },
    #[error("invalid ring buffer capacity: {0} MB")]
    InvalidCapacity(usize),
    #[error("invalid backpressure ratio: {0} (must be in (0, 1))")]
    InvalidRatio(f64),
}

/// One buffered capture record: raw frame bytes plus capture timestamp.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub timestamp: SystemTime,
    pub data: Bytes,
}

impl Chunk {
    /// Creates a chunk stamped with the current time.
    pub fn new(data: Bytes) -> Self {
        Self {
            timestamp: SystemTime::now(),
            data,
        }
    }

    /// Creates a chunk with an explicit capture timestamp.
    pub fn at(timestamp: SystemTime, data: Bytes) -> Self {
        Self { timestamp, data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Fixed-capacity FIFO buffer with byte accounting and a pause watermark.
pub struct RingBuffer {
    inner: Mutex<VecDeque<Chunk>>,
    /// Mirrors the byte total of `inner`; updated under the lock, readable
    /// without it.
    occupied: AtomicUsize,
    capacity: usize,
    threshold: usize,
}

impl RingBuffer {
    /// Creates a buffer with the given capacity in megabytes and the
    /// default [`BACKPRESSURE_RATIO`].
    pub fn with_capacity_mb(capacity_mb: usize) -> Result<Self, BufferError> {
        Self::with_ratio(capacity_mb, BACKPRESSURE_RATIO)
    }

    /// Creates a buffer with an explicit backpressure ratio.
    pub fn with_ratio(capacity_mb: usize, ratio: f64) -> Result<Self, BufferError> {
        if capacity_mb == 0 {
            return Err(BufferError::InvalidCapacity(capacity_mb));
        }
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(BufferError::InvalidRatio(ratio));
        }
        let capacity = capacity_mb * 1024 * 1024;
        Ok(Self {
            inner: Mutex::new(VecDeque::new()),
            occupied: AtomicUsize::new(0),
            capacity,
            threshold: (capacity as f64 * ratio) as usize,
        })
    }

    /// Appends a chunk, rejecting the push when it would exceed capacity.
    pub fn push(&self, chunk: Chunk) -> Result<(), BufferError> {
        let len = chunk.len();
        let mut queue = self.inner.lock();
        let occupied = self.occupied.load(Ordering::Relaxed);
        if occupied + len > self.capacity {
            return Err(BufferError::Full {
                attempted: len,
                occupied,
                capacity: self.capacity,
            });
        }
        queue.push_back(chunk);
        self.occupied.store(occupied + len, Ordering::Release);
        Ok(())
    }

    /// Removes and returns the oldest chunk, or `None` when empty.
    pub fn pop(&self) -> Option<Chunk> {
        let mut queue = self.inner.lock();
        let chunk = queue.pop_front()?;
        self.occupied.fetch_sub(chunk.len(), Ordering::Release);
        Some(chunk)
    }

    /// Currently buffered bytes.
    #[inline]
    pub fn occupied_bytes(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity
    }

    /// Occupancy level at which producers should pause.
    #[inline]
    pub fn backpressure_threshold(&self) -> usize {
        self.threshold
    }

    pub fn max_size_mb(&self) -> f64 {
        self.capacity as f64 / (1024.0 * 1024.0)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drops all buffered chunks, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let dropped = queue.len();
        queue.clear();
        self.occupied.store(0, Ordering::Release);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk(n: usize) -> Chunk {
        Chunk::new(Bytes::from(vec![0u8; n]))
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            RingBuffer::with_capacity_mb(0),
            Err(BufferError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn rejects_bad_ratio() {
        assert!(matches!(
            RingBuffer::with_ratio(1, 1.5),
            Err(BufferError::InvalidRatio(_))
        ));
    }

    #[test]
    fn threshold_below_capacity() {
        let buf = RingBuffer::with_capacity_mb(1).unwrap();
        assert!(buf.backpressure_threshold() < buf.capacity_bytes());
        assert_eq!(buf.capacity_bytes(), 1024 * 1024);
        assert_eq!(
            buf.backpressure_threshold(),
            (1024.0 * 1024.0 * BACKPRESSURE_RATIO) as usize
        );
    }

    #[test]
    fn maintains_fifo_ordering() {
        let buf = RingBuffer::with_capacity_mb(1).unwrap();
        for i in 1..=4u8 {
            buf.push(Chunk::new(Bytes::from(vec![i; 8]))).unwrap();
        }
        for i in 1..=4u8 {
            assert_eq!(buf.pop().unwrap().data[0], i);
        }
        assert!(buf.pop().is_none());
    }

    #[test]
    fn rejects_push_past_capacity() {
        let buf = RingBuffer::with_capacity_mb(1).unwrap();
        buf.push(chunk(1024 * 1024)).unwrap();
        let err = buf.push(chunk(1)).unwrap_err();
        assert!(matches!(err, BufferError::Full { attempted: 1, .. }));
        // Rejected push left occupancy untouched.
        assert_eq!(buf.occupied_bytes(), 1024 * 1024);
    }

    #[test]
    fn pop_releases_occupancy() {
        let buf = RingBuffer::with_capacity_mb(1).unwrap();
        buf.push(chunk(512 * 1024)).unwrap();
        buf.push(chunk(512 * 1024)).unwrap();
        assert_eq!(buf.occupied_bytes(), 1024 * 1024);
        buf.pop().unwrap();
        buf.push(chunk(100)).unwrap();
        assert_eq!(buf.occupied_bytes(), 512 * 1024 + 100);
    }

    #[test]
    fn clear_empties_buffer() {
        let buf = RingBuffer::with_capacity_mb(1).unwrap();
        buf.push(chunk(10)).unwrap();
        buf.push(chunk(20)).unwrap();
        assert_eq!(buf.clear(), 2);
        assert!(buf.is_empty());
        assert_eq!(buf.occupied_bytes(), 0);
    }

    proptest! {
        /// Occupancy never exceeds capacity regardless of push sizes, and
        /// accepted bytes are accounted exactly.
        #[test]
        fn occupancy_bounded(sizes in proptest::collection::vec(1usize..200_000, 1..64)) {
            let buf = RingBuffer::with_capacity_mb(1).unwrap();
            let mut accepted = 0usize;
            for size in sizes {
                if buf.push(chunk(size)).is_ok() {
                    accepted += size;
                }
                prop_assert!(buf.occupied_bytes() <= buf.capacity_bytes());
                prop_assert_eq!(buf.occupied_bytes(), accepted);
            }
        }
    }
}
