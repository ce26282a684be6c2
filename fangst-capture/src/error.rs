//! Error types for the capture sources.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device '{0}' not found")]
    DeviceNotFound(String),

    #[error("pcap failure: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("certificate failure: {0}")]
    Tls(#[from] fangst_tls::TlsError),

    #[error("persistence failure: {0}")]
    Storage(#[from] fangst_storage::StorageError),

    #[error("malformed CONNECT request: {0}")]
    InvalidConnect(String),

    #[error("capture source is already running")]
    AlreadyRunning,

    #[error("capture i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind proxy listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
