//! # fangst-core
//!
//! Foundation layer for the capture pipeline: the byte-accounted ring
//! buffer and its backpressure predicate, per-client session tracking,
//! and the secret-store abstraction used for CA key material.
//!
//! ### Key submodules:
//! - `buffer`: bounded FIFO buffer between capture sources and the exporter
//! - `session`: client-to-session mapping with idle expiry
//! - `secrets`: opaque put/get key-value secret storage with pluggable backends

pub mod buffer;
pub mod secrets;
pub mod session;

pub mod prelude {
    pub use crate::buffer::*;
    pub use crate::secrets::*;
    pub use crate::session::*;
}
