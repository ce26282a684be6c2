//! Backpressure signalling over a shared [`RingBuffer`].
//!
//! The controller is a read-only view: it never mutates the buffer, it
//! only answers "should producers pause right now" and logs the pause and
//! resume transitions exactly once each.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use super::ring::RingBuffer;

/// Point-in-time occupancy snapshot, suitable for status endpoints and
/// structured log fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferStatus {
    pub occupied_bytes: usize,
    pub capacity_bytes: usize,
    pub threshold_bytes: usize,
    pub paused: bool,
}

impl BufferStatus {
    pub fn utilization(&self) -> f64 {
        self.occupied_bytes as f64 / self.capacity_bytes as f64
    }
}

/// Watches buffer occupancy against the pause watermark.
pub struct BackpressureController {
    buffer: Arc<RingBuffer>,
    paused: AtomicBool,
}

impl BackpressureController {
    pub fn new(buffer: Arc<RingBuffer>) -> Self {
        Self {
            buffer,
            paused: AtomicBool::new(false),
        }
    }

    /// Returns whether producers should pause, logging each state change.
    pub fn should_pause(&self) -> bool {
        let occupied = self.buffer.occupied_bytes();
        let pause = occupied >= self.buffer.backpressure_threshold();
        let was_paused = self.paused.swap(pause, Ordering::AcqRel);
        if pause && !was_paused {
            warn!(
                occupied_bytes = occupied,
                threshold_bytes = self.buffer.backpressure_threshold(),
                capacity_bytes = self.buffer.capacity_bytes(),
                "Backpressure engaged, pausing capture producers"
            );
        } else if !pause && was_paused {
            info!(
                occupied_bytes = occupied,
                threshold_bytes = self.buffer.backpressure_threshold(),
                "Backpressure released, resuming capture producers"
            );
        }
        pause
    }

    /// Last observed pause state, without re-evaluating occupancy.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn buffer_status(&self) -> BufferStatus {
        BufferStatus {
            occupied_bytes: self.buffer.occupied_bytes(),
            capacity_bytes: self.buffer.capacity_bytes(),
            threshold_bytes: self.buffer.backpressure_threshold(),
            paused: self.is_paused(),
        }
    }
}
