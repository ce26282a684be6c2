//! ## fangst-telemetry::metrics
//!
//! Prometheus registry for the capture pipeline: frame throughput and
//! drops, exporter output, backpressure and rotation events, session and
//! buffer gauges.

use prometheus::{Counter, Gauge, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: prometheus::Registry,
    pub frames_captured: Counter,
    pub frames_dropped: Counter,
    pub bytes_exported: Counter,
    pub backpressure_pauses: Counter,
    pub files_rotated: Counter,
    pub pinning_flags: Counter,
    pub active_sessions: Gauge,
    pub buffer_occupied_bytes: Gauge,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let frames_captured = Counter::new(
            "fangst_frames_captured_total",
            "Frames accepted from all capture sources",
        )
        .unwrap();
        let frames_dropped = Counter::new(
            "fangst_frames_dropped_total",
            "Frames dropped at the buffer or by overflow policy",
        )
        .unwrap();
        let bytes_exported = Counter::new(
            "fangst_bytes_exported_total",
            "Payload bytes written to PCAP files",
        )
        .unwrap();
        let backpressure_pauses = Counter::new(
            "fangst_backpressure_pauses_total",
            "Producer pause transitions",
        )
        .unwrap();
        let files_rotated =
            Counter::new("fangst_files_rotated_total", "Completed PCAP file rotations").unwrap();
        let pinning_flags = Counter::new(
            "fangst_pinning_flags_total",
            "Hosts flagged as certificate-pinned",
        )
        .unwrap();
        let active_sessions =
            Gauge::new("fangst_active_sessions", "Currently tracked client sessions").unwrap();
        let buffer_occupied_bytes = Gauge::new(
            "fangst_buffer_occupied_bytes",
            "Ring buffer occupancy in bytes",
        )
        .unwrap();

        for collector in [
            Box::new(frames_captured.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(frames_dropped.clone()),
            Box::new(bytes_exported.clone()),
            Box::new(backpressure_pauses.clone()),
            Box::new(files_rotated.clone()),
            Box::new(pinning_flags.clone()),
            Box::new(active_sessions.clone()),
            Box::new(buffer_occupied_bytes.clone()),
        ] {
            registry.register(collector).unwrap();
        }

        Self {
            registry,
            frames_captured,
            frames_dropped,
            bytes_exported,
            backpressure_pauses,
            files_rotated,
            pinning_flags,
            active_sessions,
            buffer_occupied_bytes,
        }
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}
