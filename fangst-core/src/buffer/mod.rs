//! Bounded buffering between capture sources and the streaming exporter.

mod backpressure;
mod ring;

pub use backpressure::{BackpressureController, BufferStatus};
pub use ring::{BufferError, Chunk, RingBuffer, BACKPRESSURE_RATIO};
