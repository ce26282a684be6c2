//! Streaming PCAP exporter.
//!
//! Producers hand frames to [`StreamingPcapExporter::export_packet`],
//! which enqueues them on the ring buffer and reports the backpressure
//! state. A single drain task pops chunks and writes them to rotating
//! PCAP files, gated on the disk monitor's last reading so nothing is
//! flushed while free space is critical.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use pcap_file::pcap::{PcapPacket, PcapWriter};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use fangst_core::buffer::{BackpressureController, BufferError, BufferStatus, Chunk, RingBuffer};
use fangst_telemetry::MetricsRecorder;

use crate::disk::DiskSpaceMonitor;
use crate::error::StorageError;
use crate::rotation::{timestamped_file_name, RotationPolicy};

const FILE_PREFIX: &str = "capture";
const DRAIN_IDLE: Duration = Duration::from_millis(50);
const DISK_GATE_BACKOFF: Duration = Duration::from_millis(500);
const CAPACITY_POLL: Duration = Duration::from_millis(10);

/// What to do with a frame the buffer cannot take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Keep everything buffered; the producer is told to back off.
    Retain,
    /// Evict the oldest buffered chunk to make room, counted as a drop.
    DropOldest,
}

impl OverflowPolicy {
    pub fn from_name(name: &str) -> Result<Self, StorageError> {
        match name {
            "retain" => Ok(Self::Retain),
            "drop_oldest" => Ok(Self::DropOldest),
            other => Err(StorageError::UnknownOverflowPolicy(other.to_string())),
        }
    }
}

/// Outcome of a single `export_packet` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    /// Enqueued, buffer healthy.
    Accepted,
    /// Enqueued, but occupancy crossed the watermark; pause the producer.
    Paused,
    /// Not enqueued; buffer full under the retain policy.
    Rejected,
    /// Enqueued after evicting the oldest buffered chunk.
    DroppedOldest,
}

/// Drains the ring buffer into rotating PCAP files.
pub struct StreamingPcapExporter {
    buffer: Arc<RingBuffer>,
    controller: BackpressureController,
    disk: Arc<DiskSpaceMonitor>,
    metrics: Arc<MetricsRecorder>,
    output_dir: PathBuf,
    rotation: RotationPolicy,
    overflow: OverflowPolicy,
    running: Arc<AtomicBool>,
    handle: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingPcapExporter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<RingBuffer>,
        disk: Arc<DiskSpaceMonitor>,
        metrics: Arc<MetricsRecorder>,
        output_dir: impl Into<PathBuf>,
        rotation: RotationPolicy,
        overflow: OverflowPolicy,
        handle: Handle,
    ) -> Self {
        Self {
            controller: BackpressureController::new(Arc::clone(&buffer)),
            buffer,
            disk,
            metrics,
            output_dir: output_dir.into(),
            rotation,
            overflow,
            running: Arc::new(AtomicBool::new(false)),
            handle,
            task: Mutex::new(None),
        }
    }

    /// Enqueues one captured frame. Synchronous so capture loops on
    /// blocking threads can call it directly.
    pub fn export_packet(
        &self,
        data: Bytes,
        timestamp: SystemTime,
    ) -> Result<ExportStatus, StorageError> {
        let was_paused = self.controller.is_paused();
        // Bytes clones are refcounted, so keeping a handle for the
        // overflow path costs nothing.
        let chunk = Chunk::at(timestamp, data);
        match self.buffer.push(chunk.clone()) {
            Ok(()) => {
                self.metrics.frames_captured.inc();
                if self.controller.should_pause() {
                    if !was_paused {
                        self.metrics.backpressure_pauses.inc();
                    }
                    Ok(ExportStatus::Paused)
                } else {
                    Ok(ExportStatus::Accepted)
                }
            }
            Err(BufferError::Full { attempted, .. }) => match self.overflow {
                OverflowPolicy::Retain => {
                    self.metrics.frames_dropped.inc();
                    Ok(ExportStatus::Rejected)
                }
                OverflowPolicy::DropOldest => {
                    // Evict until the new frame fits. The drained chunks
                    // are lost; that is the policy's contract.
                    while self.buffer.occupied_bytes() + attempted > self.buffer.capacity_bytes() {
                        if self.buffer.pop().is_none() {
                            break;
                        }
                        self.metrics.frames_dropped.inc();
                    }
                    self.buffer.push(chunk)?;
                    Ok(ExportStatus::DroppedOldest)
                }
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Blocks (async) until occupancy falls below half the watermark.
    /// Producers that received [`ExportStatus::Paused`] call this before
    /// capturing more.
    pub async fn wait_for_capacity(&self) {
        let resume_below = self.buffer.backpressure_threshold() / 2;
        while self.buffer.occupied_bytes() >= resume_below {
            tokio::time::sleep(CAPACITY_POLL).await;
        }
        self.controller.should_pause();
    }

    pub fn buffer_status(&self) -> BufferStatus {
        self.controller.buffer_status()
    }

    pub fn start(self: &Arc<Self>) -> Result<(), StorageError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(StorageError::AlreadyRunning);
        }
        std::fs::create_dir_all(&self.output_dir).map_err(|source| StorageError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        let exporter = Arc::clone(self);
        let task = self.handle.spawn(async move { exporter.drain_loop().await });
        *self.task.lock() = Some(task);
        info!(output_dir = %self.output_dir.display(), "PCAP exporter started");
        Ok(())
    }

    /// Stops the drain task, flushing everything still buffered. Must be
    /// called from outside the async runtime.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(task) = self.task.lock().take() {
            let _ = self.handle.block_on(task);
        }
        info!("PCAP exporter stopped");
    }

    async fn drain_loop(&self) {
        let mut sink: Option<PcapSink> = None;
        loop {
            let running = self.running.load(Ordering::Acquire);
            if !running && self.buffer.is_empty() {
                break;
            }

            if self.disk.last_status().is_critical() {
                if !running {
                    // Shutdown during a critical excursion: buffered data
                    // is abandoned rather than filling the disk.
                    let dropped = self.buffer.clear();
                    warn!(dropped, "Disk critical at shutdown, discarding buffered chunks");
                    break;
                }
                sink = flush_and_close(sink);
                tokio::time::sleep(DISK_GATE_BACKOFF).await;
                continue;
            }

            match self.buffer.pop() {
                Some(chunk) => {
                    self.metrics
                        .buffer_occupied_bytes
                        .set(self.buffer.occupied_bytes() as f64);
                    self.controller.should_pause();
                    if let Err(err) = self.write_chunk(&mut sink, &chunk) {
                        error!(error = %err, "PCAP write failed, rotating file");
                        sink = None;
                    }
                }
                None => {
                    if let Some(open) = sink.as_mut() {
                        open.flush();
                    }
                    tokio::time::sleep(DRAIN_IDLE).await;
                }
            }
        }
        flush_and_close(sink);
    }

    fn write_chunk(
        &self,
        sink: &mut Option<PcapSink>,
        chunk: &Chunk,
    ) -> Result<(), StorageError> {
        if let Some(open) = sink.as_ref() {
            if self.rotation.should_rotate(open.written, open.opened_at) {
                info!(path = %open.path.display(), bytes = open.written, "Rotating capture file");
                self.metrics.files_rotated.inc();
                *sink = None;
            }
        }
        if sink.is_none() {
            *sink = Some(PcapSink::open(&self.output_dir)?);
        }
        let open = sink.as_mut().ok_or_else(|| StorageError::Pcap(
            "capture file unavailable".into(),
        ))?;
        open.write(chunk)?;
        self.metrics.bytes_exported.inc_by(chunk.len() as f64);
        Ok(())
    }
}

fn flush_and_close(sink: Option<PcapSink>) -> Option<PcapSink> {
    if let Some(mut open) = sink {
        open.flush();
        info!(path = %open.path.display(), bytes = open.written, "Closed capture file");
    }
    None
}

/// Cloneable `Write` over one buffered capture file, so the sink keeps a
/// flush handle while `PcapWriter` owns the other clone.
#[derive(Clone)]
struct SharedWriter(Arc<Mutex<BufWriter<File>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

/// One open capture file.
struct PcapSink {
    writer: PcapWriter<SharedWriter>,
    raw: SharedWriter,
    path: PathBuf,
    written: u64,
    opened_at: Instant,
}

impl PcapSink {
    fn open(dir: &Path) -> Result<Self, StorageError> {
        let path = dir.join(timestamped_file_name(FILE_PREFIX));
        let file = File::create(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        let raw = SharedWriter(Arc::new(Mutex::new(BufWriter::new(file))));
        let writer = PcapWriter::new(raw.clone())
            .map_err(|err| StorageError::Pcap(err.to_string()))?;
        info!(path = %path.display(), "Opened capture file");
        Ok(Self {
            writer,
            raw,
            path,
            written: 0,
            opened_at: Instant::now(),
        })
    }

    fn write(&mut self, chunk: &Chunk) -> Result<(), StorageError> {
        let timestamp = chunk
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let packet = PcapPacket {
            timestamp,
            orig_len: chunk.len() as u32,
            data: Cow::Borrowed(&chunk.data),
        };
        self.writer
            .write_packet(&packet)
            .map_err(|err| StorageError::Pcap(err.to_string()))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    fn flush(&mut self) {
        if let Err(err) = self.raw.flush() {
            warn!(path = %self.path.display(), error = %err, "Flush failed");
        }
    }
}
