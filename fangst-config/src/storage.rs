// fangst-config/src/storage.rs
//! Persistence configuration: ring buffer sizing, PCAP output and
//! rotation, and the disk-space floors the monitor enforces.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::validation;

/// Storage and persistence configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct StorageConfig {
    /// Directory receiving exported PCAP files.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Ring buffer capacity in megabytes.
    #[validate(range(min = 1, max = 16384))]
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity_mb: usize,

    /// Behavior when a capture chunk does not fit the buffer.
    #[validate(custom(function = validation::validate_overflow_policy))]
    #[serde(default = "default_overflow_policy")]
    pub overflow_policy: String,

    #[validate(nested)]
    pub rotation: RotationConfig,

    #[validate(nested)]
    pub disk: DiskConfig,
}

fn default_output_dir() -> String {
    "captures".into()
}

fn default_buffer_capacity() -> usize {
    64
}

fn default_overflow_policy() -> String {
    "retain".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            buffer_capacity_mb: default_buffer_capacity(),
            overflow_policy: default_overflow_policy(),
            rotation: RotationConfig::default(),
            disk: DiskConfig::default(),
        }
    }
}

/// PCAP file rotation thresholds. A file rotates when either limit is hit.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct RotationConfig {
    /// Maximum file size in megabytes.
    #[validate(range(min = 1, max = 10240))]
    #[serde(default = "default_max_file_mb")]
    pub max_file_mb: u64,

    /// Maximum file age in seconds.
    #[validate(range(min = 10, max = 86400))]
    #[serde(default = "default_max_file_secs")]
    pub max_file_secs: u64,
}

fn default_max_file_mb() -> u64 {
    100
}

fn default_max_file_secs() -> u64 {
    300
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_file_mb: default_max_file_mb(),
            max_file_secs: default_max_file_secs(),
        }
    }
}

/// Free-space floors for the disk monitor, in gigabytes.
///
/// `critical_gb` must sit strictly below `warning_gb`; `min_free_gb` is an
/// absolute floor below which capture refuses to run at all.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validate_disk_floors))]
pub struct DiskConfig {
    #[validate(range(min = 0.1, max = 10000.0))]
    #[serde(default = "default_warning_gb")]
    pub warning_gb: f64,

    #[validate(range(min = 0.1, max = 10000.0))]
    #[serde(default = "default_critical_gb")]
    pub critical_gb: f64,

    #[validate(range(min = 0.1, max = 10000.0))]
    #[serde(default = "default_min_free_gb")]
    pub min_free_gb: f64,

    /// Poll interval in seconds.
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_warning_gb() -> f64 {
    2.0
}

fn default_critical_gb() -> f64 {
    0.5
}

fn default_min_free_gb() -> f64 {
    1.0
}

fn default_check_interval() -> u64 {
    30
}

fn validate_disk_floors(disk: &DiskConfig) -> Result<(), ValidationError> {
    if disk.critical_gb >= disk.warning_gb {
        return Err(ValidationError::new("critical_floor_above_warning"));
    }
    Ok(())
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            warning_gb: default_warning_gb(),
            critical_gb: default_critical_gb(),
            min_free_gb: default_min_free_gb(),
            check_interval_secs: default_check_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_storage_validates() {
        StorageConfig::default().validate().unwrap();
    }

    #[test]
    fn inverted_floors_rejected() {
        let disk = DiskConfig {
            warning_gb: 0.5,
            critical_gb: 2.0,
            ..DiskConfig::default()
        };
        assert!(disk.validate().is_err());
    }

    #[test]
    fn bad_overflow_policy_rejected() {
        let storage = StorageConfig {
            overflow_policy: "yolo".into(),
            ..StorageConfig::default()
        };
        assert!(storage.validate().is_err());
    }
}
