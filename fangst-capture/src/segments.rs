//! Capture-file segment monitor.
//!
//! External tools drop completed capture segments into watched
//! directories; this source scans them on an interval, replays each new
//! file's frames through the exporter, and remembers what it has already
//! processed. Pre-existing segments are picked up on the first scan.

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use pcap_file::pcap::PcapReader;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fangst_storage::{ExportStatus, StreamingPcapExporter};

use crate::error::CaptureError;
use crate::record::{CaptureEvent, EventSink};

pub struct SegmentMonitor {
    directories: Vec<PathBuf>,
    scan_interval: Duration,
    exporter: Arc<StreamingPcapExporter>,
    sink: Arc<dyn EventSink>,
    processed: Arc<Mutex<HashSet<PathBuf>>>,
    handle: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SegmentMonitor {
    pub fn new(
        directories: Vec<PathBuf>,
        scan_interval: Duration,
        exporter: Arc<StreamingPcapExporter>,
        sink: Arc<dyn EventSink>,
        handle: Handle,
    ) -> Self {
        Self {
            directories,
            scan_interval,
            exporter,
            sink,
            processed: Arc::new(Mutex::new(HashSet::new())),
            handle,
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<(), CaptureError> {
        if self.task.lock().is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        for dir in &self.directories {
            if !dir.is_dir() {
                return Err(CaptureError::Io {
                    path: dir.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "segment directory missing",
                    ),
                });
            }
        }

        let directories = self.directories.clone();
        let scan_interval = self.scan_interval;
        let exporter = Arc::clone(&self.exporter);
        let sink = Arc::clone(&self.sink);
        let processed = Arc::clone(&self.processed);

        let task = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(scan_interval);
            loop {
                // First tick fires immediately, covering pre-existing
                // segments at startup.
                interval.tick().await;
                for dir in &directories {
                    scan_directory(dir, &exporter, &sink, &processed).await;
                }
            }
        });
        *self.task.lock() = Some(task);
        info!(directories = ?self.directories, "Segment monitor started");
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        info!("Segment monitor stopped");
    }
}

async fn scan_directory(
    dir: &Path,
    exporter: &StreamingPcapExporter,
    sink: &Arc<dyn EventSink>,
    processed: &Mutex<HashSet<PathBuf>>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "Segment scan failed");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext == "pcap") {
            continue;
        }
        if processed.lock().contains(&path) {
            continue;
        }
        match replay_segment(&path, exporter, sink).await {
            Ok(frames) => {
                info!(path = %path.display(), frames, "Imported capture segment");
                sink.emit(CaptureEvent::SegmentImported {
                    path: path.clone(),
                    frames,
                });
                processed.lock().insert(path);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Segment import failed");
                // Marked processed anyway so a corrupt file is not
                // retried every scan.
                processed.lock().insert(path);
            }
        }
    }
}

/// Query name of a DNS-over-UDP question inside an ethernet frame, if the
/// frame is one. Replayed segments often carry the DNS traffic that
/// attributes hostnames to clients.
fn dns_query_name(frame: &[u8]) -> Option<(std::net::Ipv4Addr, String)> {
    if frame.len() < 43 || u16::from_be_bytes([frame[12], frame[13]]) != 0x0800 {
        return None;
    }
    let ihl = ((frame[14] & 0x0f) as usize) * 4;
    let udp = 14 + ihl;
    if frame[23] != 17 || frame.len() < udp + 8 + 12 + 1 {
        return None;
    }
    let dst_port = u16::from_be_bytes([frame[udp + 2], frame[udp + 3]]);
    if dst_port != 53 {
        return None;
    }
    let source = std::net::Ipv4Addr::new(frame[26], frame[27], frame[28], frame[29]);

    // DNS question section starts 12 bytes into the payload.
    let mut pos = udp + 8 + 12;
    let mut labels = Vec::new();
    while pos < frame.len() {
        let len = frame[pos] as usize;
        if len == 0 {
            break;
        }
        // Compression pointers never appear in a first question name.
        if len > 63 || pos + 1 + len > frame.len() {
            return None;
        }
        labels.push(String::from_utf8_lossy(&frame[pos + 1..pos + 1 + len]).into_owned());
        pos += 1 + len;
    }
    if labels.is_empty() {
        return None;
    }
    Some((source, labels.join(".")))
}

async fn replay_segment(
    path: &Path,
    exporter: &StreamingPcapExporter,
    sink: &Arc<dyn EventSink>,
) -> Result<u64, CaptureError> {
    let file = File::open(path).map_err(|source| CaptureError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = PcapReader::new(file).map_err(|err| CaptureError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()),
    })?;

    let mut frames = 0u64;
    while let Some(packet) = reader.next_packet() {
        let packet = packet.map_err(|err| CaptureError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()),
        })?;
        let timestamp = UNIX_EPOCH + packet.timestamp;
        let data = Bytes::copy_from_slice(&packet.data);
        if let Some((client, query_name)) = dns_query_name(&data) {
            sink.emit(CaptureEvent::Dns(crate::record::DnsRecord {
                session_id: None,
                client: std::net::IpAddr::V4(client),
                query_name,
                observed_at: chrono::Utc::now(),
            }));
        }
        loop {
            match exporter.export_packet(data.clone(), timestamp) {
                Ok(ExportStatus::Paused) => {
                    exporter.wait_for_capacity().await;
                    break;
                }
                Ok(ExportStatus::Rejected) => {
                    // Full under the retain policy: wait and retry the
                    // same frame so the segment is imported losslessly.
                    exporter.wait_for_capacity().await;
                }
                Ok(_) => break,
                Err(err) => {
                    warn!(error = %err, "Exporter refused segment frame");
                    break;
                }
            }
        }
        frames += 1;
    }
    Ok(frames)
}
