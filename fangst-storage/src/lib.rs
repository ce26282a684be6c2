//! # fangst-storage
//!
//! Persistence path for captured traffic: the fail-fast disk-space
//! monitor, PCAP file rotation policy, and the streaming exporter that
//! drains the ring buffer to disk.

#![warn(unsafe_code)]

mod disk;
mod error;
mod exporter;
mod rotation;

pub use disk::{
    prune_oldest_captures, DiskSpaceMonitor, DiskStatus, DiskThresholds, FreeSpaceProbe, Fs2Probe,
};
pub use error::StorageError;
pub use exporter::{ExportStatus, OverflowPolicy, StreamingPcapExporter};
pub use rotation::RotationPolicy;
