//! Fail-fast free-space monitoring for the capture output directory.
//!
//! Capture must never run the host out of disk. The monitor checks free
//! space once at startup (fatal if already critical) and then on an
//! interval. Every check in the warning band fires the registered cleanup
//! callbacks once; reaching the critical floor fires them
//! and surfaces a fatal error, which the exporter also observes through
//! [`DiskSpaceMonitor::last_status`] before every flush.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::StorageError;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of free-space readings, injectable for tests.
pub trait FreeSpaceProbe: Send + Sync {
    fn free_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Probe backed by `statvfs` via the fs2 crate.
pub struct Fs2Probe;

impl FreeSpaceProbe for Fs2Probe {
    fn free_bytes(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Free-space floors in gigabytes. `critical_gb` sits strictly below
/// `warning_gb`; `min_free_gb` is an absolute refusal floor.
#[derive(Debug, Clone, Copy)]
pub struct DiskThresholds {
    pub warning_gb: f64,
    pub critical_gb: f64,
    pub min_free_gb: f64,
}

impl DiskThresholds {
    pub fn new(warning_gb: f64, critical_gb: f64, min_free_gb: f64) -> Result<Self, StorageError> {
        if critical_gb >= warning_gb {
            return Err(StorageError::InvalidThresholds {
                warning_gb,
                critical_gb,
            });
        }
        Ok(Self {
            warning_gb,
            critical_gb,
            min_free_gb,
        })
    }
}

impl Default for DiskThresholds {
    fn default() -> Self {
        Self {
            warning_gb: 2.0,
            critical_gb: 0.5,
            min_free_gb: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiskStatus {
    Ok { free_gb: f64 },
    Warning { free_gb: f64 },
    Critical { free_gb: f64 },
}

impl DiskStatus {
    pub fn is_critical(&self) -> bool {
        matches!(self, DiskStatus::Critical { .. })
    }

    pub fn free_gb(&self) -> f64 {
        match self {
            DiskStatus::Ok { free_gb }
            | DiskStatus::Warning { free_gb }
            | DiskStatus::Critical { free_gb } => *free_gb,
        }
    }
}

type CleanupCallback = Box<dyn Fn() + Send + Sync>;

/// Periodic free-space watchdog over the capture output directory.
pub struct DiskSpaceMonitor {
    path: PathBuf,
    thresholds: DiskThresholds,
    probe: Box<dyn FreeSpaceProbe>,
    check_interval: Duration,
    callbacks: Mutex<Vec<CleanupCallback>>,
    last_status: Mutex<DiskStatus>,
    in_warning: AtomicBool,
    running: AtomicBool,
    handle: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiskSpaceMonitor {
    pub fn new(
        path: impl Into<PathBuf>,
        thresholds: DiskThresholds,
        check_interval: Duration,
        handle: Handle,
    ) -> Self {
        Self::with_probe(path, thresholds, check_interval, handle, Box::new(Fs2Probe))
    }

    pub fn with_probe(
        path: impl Into<PathBuf>,
        thresholds: DiskThresholds,
        check_interval: Duration,
        handle: Handle,
        probe: Box<dyn FreeSpaceProbe>,
    ) -> Self {
        Self {
            path: path.into(),
            thresholds,
            probe,
            check_interval,
            callbacks: Mutex::new(Vec::new()),
            last_status: Mutex::new(DiskStatus::Ok { free_gb: f64::MAX }),
            in_warning: AtomicBool::new(false),
            running: AtomicBool::new(false),
            handle,
            task: Mutex::new(None),
        }
    }

    /// Registers an emergency cleanup hook, fired on every warning-band
    /// check and before a critical error is surfaced.
    pub fn register_cleanup(&self, callback: CleanupCallback) {
        self.callbacks.lock().push(callback);
    }

    pub fn monitored_path(&self) -> &Path {
        &self.path
    }

    /// Samples free space and classifies it. Critical readings run the
    /// cleanup hooks and then surface as an error.
    pub fn check_disk_space(&self) -> Result<DiskStatus, StorageError> {
        let free = self
            .probe
            .free_bytes(&self.path)
            .map_err(|source| StorageError::Io {
                path: self.path.clone(),
                source,
            })?;
        let free_gb = free as f64 / BYTES_PER_GB;

        let status = if free_gb <= self.thresholds.critical_gb
            || free_gb < self.thresholds.min_free_gb
        {
            DiskStatus::Critical { free_gb }
        } else if free_gb <= self.thresholds.warning_gb {
            DiskStatus::Warning { free_gb }
        } else {
            DiskStatus::Ok { free_gb }
        };
        *self.last_status.lock() = status;

        match status {
            DiskStatus::Critical { free_gb } => {
                error!(path = %self.path.display(), free_gb, "Disk space critical");
                self.run_cleanup();
                Err(StorageError::DiskCritical {
                    path: self.path.clone(),
                    free_gb,
                })
            }
            DiskStatus::Warning { free_gb } => {
                // The flag only deduplicates the log line; cleanup hooks
                // run on every check while in the warning band.
                if !self.in_warning.swap(true, Ordering::AcqRel) {
                    warn!(path = %self.path.display(), free_gb, "Disk space low");
                }
                self.run_cleanup();
                Ok(status)
            }
            DiskStatus::Ok { .. } => {
                self.in_warning.store(false, Ordering::Release);
                Ok(status)
            }
        }
    }

    /// Most recent classification without touching the filesystem.
    pub fn last_status(&self) -> DiskStatus {
        *self.last_status.lock()
    }

    /// Performs an immediate check (fatal when already critical) and
    /// starts the poll task.
    pub fn start(self: &Arc<Self>) -> Result<(), StorageError> {
        self.check_disk_space()?;
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let monitor = Arc::clone(self);
        let task = self.handle.spawn(async move {
            let mut interval = tokio::time::interval(monitor.check_interval);
            interval.tick().await;
            while monitor.running.load(Ordering::Acquire) {
                interval.tick().await;
                if let Err(err) = monitor.check_disk_space() {
                    error!(error = %err, "Disk check failed, capture output is gated");
                }
            }
        });
        *self.task.lock() = Some(task);
        info!(path = %self.path.display(), "Disk space monitor started");
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        info!("Disk space monitor stopped");
    }

    fn run_cleanup(&self) {
        for callback in self.callbacks.lock().iter() {
            callback();
        }
    }
}

/// Deletes the oldest `.pcap` files in `dir`, keeping at most `keep`.
/// Returns how many files were removed. Used as the default emergency
/// cleanup hook.
pub fn prune_oldest_captures(dir: &Path, keep: usize) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "pcap") {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, path))
            } else {
                None
            }
        })
        .collect();
    if files.len() <= keep {
        return 0;
    }
    files.sort_by_key(|(modified, _)| *modified);
    let excess = files.len() - keep;
    let mut removed = 0;
    for (_, path) in files.into_iter().take(excess) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                warn!(path = %path.display(), "Pruned capture file to reclaim disk space");
                removed += 1;
            }
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to prune capture file"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FixedProbe(AtomicU64);

    impl FreeSpaceProbe for FixedProbe {
        fn free_bytes(&self, _path: &Path) -> io::Result<u64> {
            Ok(self.0.load(Ordering::Relaxed))
        }
    }

    fn gb(n: f64) -> u64 {
        (n * BYTES_PER_GB) as u64
    }

    fn monitor_with(free: u64, handle: Handle) -> (Arc<DiskSpaceMonitor>, Arc<AtomicU64>) {
        let cleanups = Arc::new(AtomicU64::new(0));
        let monitor = Arc::new(DiskSpaceMonitor::with_probe(
            "/tmp",
            DiskThresholds::default(),
            Duration::from_secs(30),
            handle,
            Box::new(FixedProbe(AtomicU64::new(free))),
        ));
        let counter = Arc::clone(&cleanups);
        monitor.register_cleanup(Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        (monitor, cleanups)
    }

    #[test]
    fn classifies_free_space() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (monitor, cleanups) = monitor_with(gb(10.0), rt.handle().clone());
        assert!(matches!(
            monitor.check_disk_space().unwrap(),
            DiskStatus::Ok { .. }
        ));
        assert_eq!(cleanups.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn warning_fires_cleanup_on_every_check() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (monitor, cleanups) = monitor_with(gb(1.5), rt.handle().clone());
        monitor.check_disk_space().unwrap();
        monitor.check_disk_space().unwrap();
        assert_eq!(cleanups.load(Ordering::Relaxed), 2);
        assert!(matches!(
            monitor.last_status(),
            DiskStatus::Warning { .. }
        ));
    }

    #[test]
    fn critical_is_fatal_after_cleanup() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (monitor, cleanups) = monitor_with(gb(0.2), rt.handle().clone());
        assert!(matches!(
            monitor.check_disk_space(),
            Err(StorageError::DiskCritical { .. })
        ));
        assert_eq!(cleanups.load(Ordering::Relaxed), 1);
        assert!(monitor.last_status().is_critical());
    }

    #[test]
    fn below_min_free_is_critical_even_above_critical_floor() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        // 0.8 GB free: above the 0.5 GB critical floor but below the
        // 1.0 GB absolute minimum.
        let (monitor, _) = monitor_with(gb(0.8), rt.handle().clone());
        assert!(monitor.check_disk_space().is_err());
    }

    #[test]
    fn start_fails_fast_when_already_critical() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (monitor, _) = monitor_with(gb(0.1), rt.handle().clone());
        assert!(monitor.start().is_err());
    }

    #[test]
    fn invalid_thresholds_rejected() {
        assert!(DiskThresholds::new(0.5, 2.0, 1.0).is_err());
        assert!(DiskThresholds::new(2.0, 0.5, 1.0).is_ok());
    }

    #[test]
    fn prune_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            std::fs::write(dir.path().join(format!("capture_{i}.pcap")), b"x").unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(prune_oldest_captures(dir.path(), 2), 2);
        assert!(!dir.path().join("capture_0.pcap").exists());
        assert!(dir.path().join("capture_3.pcap").exists());
    }
}
