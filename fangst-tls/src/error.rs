//! Error types for CA management and leaf issuance.

use std::path::PathBuf;

use thiserror::Error;

use fangst_core::secrets::SecretError;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("secret store failure: {0}")]
    Secret(#[from] SecretError),

    #[error("CA certificate at {path} is expired (not_after {not_after})")]
    CaExpired { path: PathBuf, not_after: String },

    #[error("CA certificate at {path} is not yet valid (not_before {not_before})")]
    CaNotYetValid { path: PathBuf, not_before: String },

    #[error("certificate at {path} lacks the CA basic constraint")]
    NotACa { path: PathBuf },

    #[error("CA certificate at {path} is unparseable: {reason}")]
    InvalidCaCert { path: PathBuf, reason: String },

    #[error("certificate manager not initialized, call validate_or_generate first")]
    NotInitialized,

    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("TLS configuration failed: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("certificate i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to use symlinked certificate path: {0}")]
    SymlinkRefused(PathBuf),
}
