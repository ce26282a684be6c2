// fangst-config/src/tls.rs
//! Certificate authority and secret backend configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Where CA private key material lives.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecretBackend {
    /// Owner-only files under `secret_dir`.
    File,
    /// Process memory only; key material does not survive restart.
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TlsConfig {
    /// Directory holding the CA certificate (public half only).
    #[serde(default = "default_cert_dir")]
    pub cert_dir: String,

    #[serde(default = "default_backend")]
    pub secret_backend: SecretBackend,

    /// Directory for the file secret backend.
    #[serde(default = "default_secret_dir")]
    pub secret_dir: String,
}

fn default_cert_dir() -> String {
    "certs".into()
}

fn default_backend() -> SecretBackend {
    SecretBackend::File
}

fn default_secret_dir() -> String {
    "certs/private".into()
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_dir: default_cert_dir(),
            secret_backend: default_backend(),
            secret_dir: default_secret_dir(),
        }
    }
}
