// fangst-config/src/session.rs
//! Session tracking configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct SessionConfig {
    /// Idle seconds before a session expires.
    #[validate(range(min = 10, max = 604800))]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: i64,

    /// Interval between expiry sweeps, in seconds.
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_timeout_secs() -> i64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}
