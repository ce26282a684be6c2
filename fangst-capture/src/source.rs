//! Closed dispatch over the capture source variants.

use crate::error::CaptureError;
use crate::proxy::InterceptProxy;
use crate::raw::RawCapture;
use crate::segments::SegmentMonitor;

/// Every way traffic enters the pipeline. A closed enum keeps dispatch
/// static and the set of sources auditable.
pub enum CaptureSource {
    Proxy(InterceptProxy),
    Raw(RawCapture),
    Segments(SegmentMonitor),
}

impl CaptureSource {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureSource::Proxy(_) => "intercept-proxy",
            CaptureSource::Raw(_) => "raw-capture",
            CaptureSource::Segments(_) => "segment-monitor",
        }
    }

    pub fn start(&self) -> Result<(), CaptureError> {
        match self {
            CaptureSource::Proxy(proxy) => proxy.start(),
            CaptureSource::Raw(raw) => raw.start(),
            CaptureSource::Segments(segments) => segments.start(),
        }
    }

    pub fn stop(&self) {
        match self {
            CaptureSource::Proxy(proxy) => proxy.stop(),
            CaptureSource::Raw(raw) => raw.stop(),
            CaptureSource::Segments(segments) => segments.stop(),
        }
    }
}
