//! PCAP file rotation policy.

use std::time::{Duration, Instant};

use chrono::Local;

/// A file rotates when it exceeds either the size or the age limit.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    pub max_file_bytes: u64,
    pub max_file_age: Duration,
}

impl RotationPolicy {
    pub fn new(max_file_mb: u64, max_file_secs: u64) -> Self {
        Self {
            max_file_bytes: max_file_mb * 1024 * 1024,
            max_file_age: Duration::from_secs(max_file_secs),
        }
    }

    pub fn should_rotate(&self, written_bytes: u64, opened_at: Instant) -> bool {
        written_bytes >= self.max_file_bytes || opened_at.elapsed() >= self.max_file_age
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::new(100, 300)
    }
}

/// Timestamped file name for a new capture file, local time.
pub fn timestamped_file_name(prefix: &str) -> String {
    format!("{}_{}.pcap", prefix, Local::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_on_size() {
        let policy = RotationPolicy::new(1, 3600);
        assert!(!policy.should_rotate(1024, Instant::now()));
        assert!(policy.should_rotate(1024 * 1024, Instant::now()));
    }

    #[test]
    fn rotates_on_age() {
        let policy = RotationPolicy {
            max_file_bytes: u64::MAX,
            max_file_age: Duration::from_millis(1),
        };
        let opened = Instant::now() - Duration::from_millis(5);
        assert!(policy.should_rotate(0, opened));
    }

    #[test]
    fn file_names_carry_prefix_and_extension() {
        let name = timestamped_file_name("capture");
        assert!(name.starts_with("capture_"));
        assert!(name.ends_with(".pcap"));
    }
}
