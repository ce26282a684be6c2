//! Error types for the persistence path.

use std::path::PathBuf;

use thiserror::Error;

use fangst_core::buffer::BufferError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("disk space critical at {path}: {free_gb:.2} GB free")]
    DiskCritical { path: PathBuf, free_gb: f64 },

    #[error(
        "invalid disk thresholds: critical {critical_gb} GB must be below warning {warning_gb} GB"
    )]
    InvalidThresholds { warning_gb: f64, critical_gb: f64 },

    #[error("unknown overflow policy '{0}'")]
    UnknownOverflowPolicy(String),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("PCAP encoding failure: {0}")]
    Pcap(String),

    #[error("exporter is already running")]
    AlreadyRunning,

    #[error("storage i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
