//! # fangst-capture
//!
//! Traffic acquisition: the TLS-intercepting proxy, raw interface
//! capture, and the capture-file segment monitor, all feeding the
//! streaming exporter and emitting structured records through an
//! [`record::EventSink`].

#![warn(unsafe_code)]

mod error;
pub mod http;
pub mod pinning;
pub mod proxy;
pub mod radiotap;
pub mod raw;
pub mod record;
pub mod segments;
mod source;

pub use error::CaptureError;
pub use proxy::InterceptProxy;
pub use raw::RawCapture;
pub use record::{
    AuthScheme, CaptureEvent, ChannelEventSink, DnsRecord, EventSink, FlowRecord,
    WirelessMetadata,
};
pub use segments::SegmentMonitor;
pub use source::CaptureSource;
