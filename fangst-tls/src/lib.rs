//! # fangst-tls
//!
//! Certificate authority management for the intercepting proxy: CA
//! validation and generation, per-host leaf issuance, and the rustls
//! configs for both sides of an intercepted connection.
//!
//! The CA private key lives in a [`fangst_core::secrets::SecretStore`]
//! backend; only the public certificate is written under the cert
//! directory.

#![warn(unsafe_code)]

mod cert;
mod error;

pub use cert::{CertificateManager, LeafCert, CA_COMMON_NAME, CA_VALIDITY_DAYS, LEAF_VALIDITY_DAYS};
pub use error::TlsError;
