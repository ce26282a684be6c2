// fangst-config/src/capture.rs
//! Capture source configuration.
//!
//! Three acquisition paths, each individually switchable:
//! - TLS-intercepting proxy
//! - Raw interface capture (pcap)
//! - Capture-file segment monitoring

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

/// Capture source configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CaptureConfig {
    #[validate(nested)]
    pub proxy: ProxyConfig,

    #[validate(nested)]
    pub raw: RawCaptureConfig,

    #[validate(nested)]
    pub segments: SegmentMonitorConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            raw: RawCaptureConfig::default(),
            segments: SegmentMonitorConfig::default(),
        }
    }
}

/// Intercepting proxy parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_enabled")]
    pub enabled: bool,

    /// Listen address for CONNECT requests.
    #[serde(default = "default_proxy_listen")]
    pub listen: String,

    /// Listen port.
    #[validate(range(min = 1, max = 65535))]
    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Client TLS handshake failures within the window before a host is
    /// flagged as certificate-pinned.
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_pinning_threshold")]
    pub pinning_failure_threshold: u32,

    /// Pinning detection window in seconds.
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_pinning_window")]
    pub pinning_window_secs: u64,
}

fn default_proxy_enabled() -> bool {
    true
}

fn default_proxy_listen() -> String {
    "0.0.0.0".into()
}

fn default_proxy_port() -> u16 {
    8443
}

fn default_pinning_threshold() -> u32 {
    3
}

fn default_pinning_window() -> u64 {
    30
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: default_proxy_enabled(),
            listen: default_proxy_listen(),
            port: default_proxy_port(),
            pinning_failure_threshold: default_pinning_threshold(),
            pinning_window_secs: default_pinning_window(),
        }
    }
}

/// Raw interface capture parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct RawCaptureConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Network interface for live capture.
    #[validate(custom(function = validation::validate_interface))]
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Run in promiscuous mode?
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// Optional BPF filter expression.
    #[serde(default)]
    pub filter: Option<String>,

    /// Snapshot length in bytes.
    #[validate(range(min = 64, max = 262144))]
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,
}

fn default_interface() -> String {
    "eth0".into()
}

fn default_promiscuous() -> bool {
    true
}

fn default_snaplen() -> i32 {
    65535
}

impl Default for RawCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interface: default_interface(),
            promiscuous: default_promiscuous(),
            filter: None,
            snaplen: default_snaplen(),
        }
    }
}

/// Capture-file segment monitor parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct SegmentMonitorConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directories scanned for completed capture segments.
    #[serde(default)]
    pub directories: Vec<String>,

    /// Scan interval in seconds.
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

fn default_scan_interval() -> u64 {
    5
}

impl Default for SegmentMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directories: Vec::new(),
            scan_interval_secs: default_scan_interval(),
        }
    }
}
