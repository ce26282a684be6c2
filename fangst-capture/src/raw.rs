//! Raw interface capture via libpcap.
//!
//! The device is opened fallibly during `start` so misconfiguration is
//! attributable to this component at startup; the blocking read loop then
//! runs on a dedicated thread until the terminate flag flips. Frames go
//! straight to the exporter; 802.11 links additionally get radio metadata
//! decoded for the event stream.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use pcap::{Active, Capture, Device, Linktype};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fangst_core::session::SessionTracker;
use fangst_storage::{ExportStatus, StreamingPcapExporter};

use crate::error::CaptureError;
use crate::radiotap;
use crate::record::WirelessMetadata;

const READ_TIMEOUT_MS: i32 = 1000;
const PAUSE_BACKOFF: Duration = Duration::from_millis(20);

const ETHERTYPE_IPV4: u16 = 0x0800;

pub struct RawCaptureSettings {
    pub interface: String,
    pub promiscuous: bool,
    pub snaplen: i32,
    pub filter: Option<String>,
}

/// Live capture source for one network interface.
pub struct RawCapture {
    settings: RawCaptureSettings,
    exporter: Arc<StreamingPcapExporter>,
    sessions: Arc<SessionTracker>,
    terminate: Arc<AtomicBool>,
    handle: Handle,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RawCapture {
    pub fn new(
        settings: RawCaptureSettings,
        exporter: Arc<StreamingPcapExporter>,
        sessions: Arc<SessionTracker>,
        handle: Handle,
    ) -> Self {
        Self {
            settings,
            exporter,
            sessions,
            terminate: Arc::new(AtomicBool::new(false)),
            handle,
            task: parking_lot::Mutex::new(None),
        }
    }

    pub fn interface(&self) -> &str {
        &self.settings.interface
    }

    /// Opens the device and starts the blocking read loop.
    pub fn start(&self) -> Result<(), CaptureError> {
        if self.task.lock().is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let device = Device::list()?
            .into_iter()
            .find(|d| d.name == self.settings.interface)
            .ok_or_else(|| CaptureError::DeviceNotFound(self.settings.interface.clone()))?;

        let mut capture = Capture::from_device(device)?
            .promisc(self.settings.promiscuous)
            .snaplen(self.settings.snaplen)
            .timeout(READ_TIMEOUT_MS)
            .open()?;
        if let Some(filter) = &self.settings.filter {
            capture.filter(filter, true)?;
        }
        let linktype = capture.get_datalink();

        self.terminate.store(false, Ordering::Release);
        let terminate = Arc::clone(&self.terminate);
        let exporter = Arc::clone(&self.exporter);
        let sessions = Arc::clone(&self.sessions);
        let interface = self.settings.interface.clone();

        let task = self.handle.spawn_blocking(move || {
            read_loop(capture, linktype, &terminate, &exporter, &sessions);
            info!(interface, "Raw capture loop exited");
        });
        *self.task.lock() = Some(task);
        info!(interface = %self.settings.interface, ?linktype, "Raw capture started");
        Ok(())
    }

    pub fn stop(&self) {
        self.terminate.store(true, Ordering::Release);
        if let Some(task) = self.task.lock().take() {
            let _ = self.handle.block_on(task);
        }
    }
}

fn read_loop(
    mut capture: Capture<Active>,
    linktype: Linktype,
    terminate: &AtomicBool,
    exporter: &StreamingPcapExporter,
    sessions: &SessionTracker,
) {
    let is_radiotap = linktype == Linktype::IEEE802_11_RADIOTAP;
    while !terminate.load(Ordering::Relaxed) {
        match capture.next_packet() {
            Ok(packet) => {
                let timestamp = SystemTime::UNIX_EPOCH
                    + Duration::new(
                        packet.header.ts.tv_sec as u64,
                        (packet.header.ts.tv_usec as u32).saturating_mul(1_000),
                    );
                let data = Bytes::copy_from_slice(packet.data);

                if is_radiotap {
                    if let Some((meta, _)) = radiotap::parse(&data) {
                        log_wireless(&meta);
                    }
                } else if let Some(source) = ipv4_source(&data) {
                    sessions.get_or_create_session(IpAddr::V4(source), None, None);
                }

                match exporter.export_packet(data, timestamp) {
                    Ok(ExportStatus::Accepted) | Ok(ExportStatus::DroppedOldest) => {}
                    Ok(ExportStatus::Paused) => {
                        // Blocking thread: a short sleep stands in for the
                        // async capacity wait.
                        while exporter.buffer_status().paused
                            && !terminate.load(Ordering::Relaxed)
                        {
                            std::thread::sleep(PAUSE_BACKOFF);
                        }
                    }
                    Ok(ExportStatus::Rejected) => {
                        warn!("Frame dropped, buffer full under retain policy");
                    }
                    Err(err) => {
                        error!(error = %err, "Exporter refused frame, stopping capture");
                        break;
                    }
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(err) => {
                error!(error = %err, "Capture read failed");
                break;
            }
        }
    }
}

fn log_wireless(meta: &WirelessMetadata) {
    debug!(
        signal_dbm = ?meta.signal_dbm,
        channel = ?meta.channel,
        "Wireless frame"
    );
}

/// Source address of an IPv4-over-ethernet frame, used for session
/// attribution of raw traffic.
fn ipv4_source(frame: &[u8]) -> Option<Ipv4Addr> {
    if frame.len() < 34 {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    Some(Ipv4Addr::new(frame[26], frame[27], frame[28], frame[29]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_frame(source: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![0u8; 34];
        frame[12] = 0x08;
        frame[13] = 0x00;
        frame[26..30].copy_from_slice(&source);
        frame
    }

    #[test]
    fn extracts_ipv4_source() {
        let frame = ipv4_frame([192, 168, 1, 7]);
        assert_eq!(ipv4_source(&frame), Some(Ipv4Addr::new(192, 168, 1, 7)));
    }

    #[test]
    fn ignores_non_ipv4_frames() {
        let mut frame = ipv4_frame([10, 0, 0, 1]);
        frame[12] = 0x86; // IPv6 ethertype
        frame[13] = 0xdd;
        assert_eq!(ipv4_source(&frame), None);
        assert_eq!(ipv4_source(&[0u8; 20]), None);
    }
}
