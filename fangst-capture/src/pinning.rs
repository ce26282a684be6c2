//! Certificate pinning detection.
//!
//! A client that refuses the interception CA aborts the TLS handshake.
//! Repeated aborts against the same host inside a short window are a
//! strong signal the client pins its certificates; such hosts are flagged
//! so operators can exempt them from interception.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

/// Failures within the window before a host is flagged.
#[derive(Debug, Clone, Copy)]
pub struct FailurePolicy {
    pub threshold: u32,
    pub window: Duration,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct DetectorState {
    failures: HashMap<String, VecDeque<Instant>>,
    flagged: HashSet<String>,
}

pub struct PinningDetector {
    policy: FailurePolicy,
    state: Mutex<DetectorState>,
}

impl PinningDetector {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(DetectorState::default()),
        }
    }

    /// Records a client handshake failure against `host`. Returns the
    /// failure count if the host just became flagged.
    pub fn record_failure(&self, host: &str) -> Option<u32> {
        let now = Instant::now();
        let mut state = self.state.lock();
        if state.flagged.contains(host) {
            return None;
        }
        let window = self.policy.window;
        let failures = state.failures.entry(host.to_string()).or_default();
        failures.push_back(now);
        while failures
            .front()
            .is_some_and(|&t| now.duration_since(t) > window)
        {
            failures.pop_front();
        }
        let count = failures.len() as u32;
        if count >= self.policy.threshold {
            state.failures.remove(host);
            state.flagged.insert(host.to_string());
            warn!(host, failures = count, "Host flagged as certificate-pinned");
            Some(count)
        } else {
            None
        }
    }

    pub fn is_flagged(&self, host: &str) -> bool {
        self.state.lock().flagged.contains(host)
    }

    pub fn flagged_hosts(&self) -> Vec<String> {
        self.state.lock().flagged.iter().cloned().collect()
    }
}

impl Default for PinningDetector {
    fn default() -> Self {
        Self::new(FailurePolicy::default())
    }
}
