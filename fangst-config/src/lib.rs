//! # Fangst Configuration System
//!
//! Hierarchical configuration for the capture platform: defaults, an
//! optional YAML file, and `FANGST_*` environment overrides, validated
//! before anything starts.
//!
//! ## Features
//! - **Unified Configuration**: Single source of truth across all components
//! - **Validation**: Runtime validation of critical parameters before startup
//! - **Environment Awareness**: `FANGST_`-prefixed overrides with `__` nesting

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod capture;
mod error;
mod session;
mod storage;
mod telemetry;
mod tls;
mod validation;

pub use capture::{CaptureConfig, ProxyConfig, RawCaptureConfig, SegmentMonitorConfig};
pub use error::ConfigError;
pub use session::SessionConfig;
pub use storage::{DiskConfig, RotationConfig, StorageConfig};
pub use telemetry::TelemetryConfig;
pub use tls::{SecretBackend, TlsConfig};

/// Top-level configuration container for all Fangst components.
#[derive(Debug, Serialize, Deserialize, Validate, Default)]
pub struct FangstConfig {
    /// Capture sources (intercepting proxy, raw capture, segment monitor).
    #[validate(nested)]
    pub capture: CaptureConfig,

    /// Buffering, PCAP output, rotation and disk floors.
    #[validate(nested)]
    pub storage: StorageConfig,

    /// Session tracking parameters.
    #[validate(nested)]
    pub session: SessionConfig,

    /// Certificate authority and secret backend.
    #[validate(nested)]
    pub tls: TlsConfig,

    /// Telemetry and observability configuration.
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl FangstConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/fangst.yaml` - base settings. If missing, defaults are used.
    /// 3. `FANGST_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(FangstConfig::default()));

        if Path::new("config/fangst.yaml").exists() {
            figment = figment.merge(Yaml::file("config/fangst.yaml"));
        }

        figment
            .merge(Env::prefixed("FANGST_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }

    /// Load configuration from a specific path for testing/validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Figment::from(Serialized::defaults(FangstConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("FANGST_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn full_config_validation() {
        let config = FangstConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn load_from_missing_path_fails() {
        assert!(matches!(
            FangstConfig::load_from_path("/nonexistent/fangst.yaml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "storage:\n  buffer_capacity_mb: 256\nsession:\n  timeout_secs: 120"
        )
        .unwrap();
        let config = FangstConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.storage.buffer_capacity_mb, 256);
        assert_eq!(config.session.timeout_secs, 120);
        // Untouched sections keep their defaults.
        assert_eq!(config.capture.proxy.port, 8443);
    }

    #[test]
    fn rejects_inverted_disk_floors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "storage:\n  disk:\n    warning_gb: 1.0\n    critical_gb: 2.0"
        )
        .unwrap();
        assert!(matches!(
            FangstConfig::load_from_path(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }
}
