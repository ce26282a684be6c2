//! Client session tracking with idle expiry.
//!
//! Every captured flow is attributed to a session keyed by client IP. A
//! client has at most one active session; a session that has been idle for
//! longer than the tracker timeout is treated as expired and replaced on
//! the client's next appearance.

mod tracker;

pub use tracker::{Session, SessionStats, SessionTracker, DEFAULT_SESSION_TIMEOUT_SECS};
