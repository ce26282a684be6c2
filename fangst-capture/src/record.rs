//! Structured records emitted by the capture sources.
//!
//! Consumers receive these through an explicit [`EventSink`] handle; the
//! raw bytes themselves travel separately through the exporter. Credential
//! values are never carried in records, only the authentication scheme
//! observed.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Authentication scheme observed on a flow. The credential material is
/// deliberately not captured into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
    OAuth,
    Other,
}

/// Radio-layer metadata from an 802.11 capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirelessMetadata {
    pub signal_dbm: Option<i8>,
    pub channel: Option<u8>,
}

/// One intercepted HTTP exchange.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    pub flow_id: Uuid,
    pub session_id: Uuid,
    pub client: IpAddr,
    pub host: String,
    pub method: Option<String>,
    pub target: Option<String>,
    pub status: Option<u16>,
    pub user_agent: Option<String>,
    pub cookie_names: Vec<String>,
    pub auth_scheme: Option<AuthScheme>,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// One observed DNS query.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub session_id: Option<Uuid>,
    pub client: IpAddr,
    pub query_name: String,
    pub observed_at: DateTime<Utc>,
}

/// Everything the capture sources report upward.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Flow(FlowRecord),
    Dns(DnsRecord),
    /// A host was flagged as certificate-pinned after repeated client
    /// handshake failures.
    PinnedHost { host: String, failures: u32 },
    /// A completed capture segment was imported from disk.
    SegmentImported { path: PathBuf, frames: u64 },
}

/// Destination for capture events. Sources hold this as an explicit
/// handle; there is no global registry.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CaptureEvent);
}

/// Sink backed by an unbounded tokio channel.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl ChannelEventSink {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: CaptureEvent) {
        if self.tx.send(event).is_err() {
            warn!("Capture event dropped, consumer is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelEventSink::channel();
        sink.emit(CaptureEvent::Dns(DnsRecord {
            session_id: None,
            client: IpAddr::V4(Ipv4Addr::LOCALHOST),
            query_name: "example.com".into(),
            observed_at: Utc::now(),
        }));
        match rx.try_recv().unwrap() {
            CaptureEvent::Dns(record) => assert_eq!(record.query_name, "example.com"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_after_consumer_drop_does_not_panic() {
        let (sink, rx) = ChannelEventSink::channel();
        drop(rx);
        sink.emit(CaptureEvent::PinnedHost {
            host: "pinned.test".into(),
            failures: 3,
        });
    }
}
