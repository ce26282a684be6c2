//! Runtime wiring.
//!
//! Builds every component from the validated configuration, registers
//! them with the orchestrator in dependency order (disk gate first, then
//! key material, session tracking, the exporter, and finally the capture
//! sources) and runs until a shutdown signal. The orchestrator itself
//! runs on the calling thread, outside the async runtime, so component
//! stop closures may block on task completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::info;

use fangst_capture::pinning::{FailurePolicy, PinningDetector};
use fangst_capture::proxy::ProxySettings;
use fangst_capture::raw::RawCaptureSettings;
use fangst_capture::{
    CaptureEvent, CaptureSource, ChannelEventSink, EventSink, InterceptProxy, RawCapture,
    SegmentMonitor,
};
use fangst_config::{FangstConfig, SecretBackend};
use fangst_core::buffer::RingBuffer;
use fangst_core::secrets::{FileSecretStore, MemorySecretStore, SecretStore};
use fangst_core::session::SessionTracker;
use fangst_storage::{
    prune_oldest_captures, DiskSpaceMonitor, DiskThresholds, OverflowPolicy, RotationPolicy,
    StreamingPcapExporter,
};
use fangst_telemetry::{EventLogger, MetricsRecorder};
use fangst_tls::CertificateManager;

use crate::error::EngineError;
use crate::orchestrator::{Component, StartupOrchestrator};

/// Capture files kept when emergency cleanup fires.
const EMERGENCY_KEEP_FILES: usize = 8;

fn init_err(err: impl std::error::Error + Send + Sync + 'static) -> EngineError {
    EngineError::Init(Box::new(err))
}

/// Owns the tokio runtime and the orchestrated component set.
pub struct CaptureRuntime {
    runtime: Runtime,
    orchestrator: StartupOrchestrator,
    metrics: Arc<MetricsRecorder>,
}

impl CaptureRuntime {
    pub fn new(config: FangstConfig) -> Result<Self, EngineError> {
        let runtime = Runtime::new().map_err(init_err)?;
        let handle = runtime.handle().clone();
        let metrics = Arc::new(MetricsRecorder::new());

        let secrets: Arc<dyn SecretStore> = match config.tls.secret_backend {
            SecretBackend::File => {
                Arc::new(FileSecretStore::new(&config.tls.secret_dir).map_err(init_err)?)
            }
            SecretBackend::Memory => Arc::new(MemorySecretStore::new()),
        };
        let certs = Arc::new(CertificateManager::new(&config.tls.cert_dir, secrets));
        let sessions = Arc::new(SessionTracker::with_timeout_secs(config.session.timeout_secs));

        let thresholds = DiskThresholds::new(
            config.storage.disk.warning_gb,
            config.storage.disk.critical_gb,
            config.storage.disk.min_free_gb,
        )
        .map_err(init_err)?;
        let disk = Arc::new(DiskSpaceMonitor::new(
            &config.storage.output_dir,
            thresholds,
            Duration::from_secs(config.storage.disk.check_interval_secs),
            handle.clone(),
        ));
        let cleanup_dir = PathBuf::from(&config.storage.output_dir);
        disk.register_cleanup(Box::new(move || {
            prune_oldest_captures(&cleanup_dir, EMERGENCY_KEEP_FILES);
        }));

        let buffer = Arc::new(
            RingBuffer::with_capacity_mb(config.storage.buffer_capacity_mb).map_err(init_err)?,
        );
        let overflow =
            OverflowPolicy::from_name(&config.storage.overflow_policy).map_err(init_err)?;
        let rotation = RotationPolicy::new(
            config.storage.rotation.max_file_mb,
            config.storage.rotation.max_file_secs,
        );
        let exporter = Arc::new(StreamingPcapExporter::new(
            buffer,
            Arc::clone(&disk),
            Arc::clone(&metrics),
            &config.storage.output_dir,
            rotation,
            overflow,
            handle.clone(),
        ));

        let (sink, events) = ChannelEventSink::channel();
        let sink: Arc<dyn EventSink> = sink;
        handle.spawn(consume_events(events, Arc::clone(&metrics)));

        let mut orchestrator = StartupOrchestrator::new();

        register_disk_monitor(&mut orchestrator, Arc::clone(&disk))?;
        register_certificate_manager(&mut orchestrator, Arc::clone(&certs))?;
        register_session_sweep(
            &mut orchestrator,
            Arc::clone(&sessions),
            Arc::clone(&metrics),
            Duration::from_secs(config.session.sweep_interval_secs),
            handle.clone(),
        )?;
        register_exporter(&mut orchestrator, Arc::clone(&exporter))?;

        for source in build_sources(
            &config,
            &certs,
            &sessions,
            &exporter,
            &sink,
            handle.clone(),
        ) {
            register_source(&mut orchestrator, source)?;
        }

        Ok(Self {
            runtime,
            orchestrator,
            metrics,
        })
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        self.orchestrator.start()
    }

    pub fn stop(&mut self) {
        self.orchestrator.stop();
    }

    pub fn started_components(&self) -> Vec<String> {
        self.orchestrator.started_components()
    }

    /// Starts everything, waits for SIGINT/SIGTERM, stops in reverse.
    pub fn run(mut self) -> Result<(), EngineError> {
        self.start()?;
        self.runtime.block_on(shutdown_signal());
        info!("Shutdown signal received");
        self.stop();
        Ok(())
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn consume_events(
    mut events: tokio::sync::mpsc::UnboundedReceiver<CaptureEvent>,
    metrics: Arc<MetricsRecorder>,
) {
    while let Some(event) = events.recv().await {
        match event {
            CaptureEvent::Flow(flow) => {
                EventLogger::log_event(
                    "flow_completed",
                    vec![
                        KeyValue::new("host", flow.host),
                        KeyValue::new("session_id", flow.session_id.to_string()),
                        KeyValue::new("method", flow.method.unwrap_or_default()),
                        KeyValue::new("status", i64::from(flow.status.unwrap_or(0))),
                        KeyValue::new("request_bytes", flow.request_bytes as i64),
                        KeyValue::new("response_bytes", flow.response_bytes as i64),
                    ],
                )
                .await;
            }
            CaptureEvent::Dns(record) => {
                EventLogger::log_event(
                    "dns_query",
                    vec![
                        KeyValue::new("query_name", record.query_name),
                        KeyValue::new("client", record.client.to_string()),
                    ],
                )
                .await;
            }
            CaptureEvent::PinnedHost { host, failures } => {
                metrics.pinning_flags.inc();
                EventLogger::log_event(
                    "pinned_host",
                    vec![
                        KeyValue::new("host", host),
                        KeyValue::new("failures", i64::from(failures)),
                    ],
                )
                .await;
            }
            CaptureEvent::SegmentImported { path, frames } => {
                EventLogger::log_event(
                    "segment_imported",
                    vec![
                        KeyValue::new("path", path.display().to_string()),
                        KeyValue::new("frames", frames as i64),
                    ],
                )
                .await;
            }
        }
    }
}

fn build_sources(
    config: &FangstConfig,
    certs: &Arc<CertificateManager>,
    sessions: &Arc<SessionTracker>,
    exporter: &Arc<StreamingPcapExporter>,
    sink: &Arc<dyn EventSink>,
    handle: Handle,
) -> Vec<Arc<CaptureSource>> {
    let mut sources = Vec::new();

    if config.capture.proxy.enabled {
        let pinning = Arc::new(PinningDetector::new(FailurePolicy {
            threshold: config.capture.proxy.pinning_failure_threshold,
            window: Duration::from_secs(config.capture.proxy.pinning_window_secs),
        }));
        sources.push(Arc::new(CaptureSource::Proxy(InterceptProxy::new(
            ProxySettings {
                listen: config.capture.proxy.listen.clone(),
                port: config.capture.proxy.port,
            },
            Arc::clone(certs),
            Arc::clone(sessions),
            Arc::clone(exporter),
            pinning,
            Arc::clone(sink),
            handle.clone(),
        ))));
    }

    if config.capture.raw.enabled {
        sources.push(Arc::new(CaptureSource::Raw(RawCapture::new(
            RawCaptureSettings {
                interface: config.capture.raw.interface.clone(),
                promiscuous: config.capture.raw.promiscuous,
                snaplen: config.capture.raw.snaplen,
                filter: config.capture.raw.filter.clone(),
            },
            Arc::clone(exporter),
            Arc::clone(sessions),
            handle.clone(),
        ))));
    }

    if config.capture.segments.enabled {
        sources.push(Arc::new(CaptureSource::Segments(SegmentMonitor::new(
            config
                .capture
                .segments
                .directories
                .iter()
                .map(PathBuf::from)
                .collect(),
            Duration::from_secs(config.capture.segments.scan_interval_secs),
            Arc::clone(exporter),
            Arc::clone(sink),
            handle,
        ))));
    }

    sources
}

fn register_disk_monitor(
    orchestrator: &mut StartupOrchestrator,
    disk: Arc<DiskSpaceMonitor>,
) -> Result<(), EngineError> {
    let start_disk = Arc::clone(&disk);
    orchestrator.register_component(Component::new(
        "disk-monitor",
        move || {
            std::fs::create_dir_all(start_disk.monitored_path())?;
            start_disk.start()?;
            Ok(())
        },
        move || {
            disk.stop();
            Ok(())
        },
    ))
}

fn register_certificate_manager(
    orchestrator: &mut StartupOrchestrator,
    certs: Arc<CertificateManager>,
) -> Result<(), EngineError> {
    orchestrator.register_component(Component::new(
        "certificate-manager",
        move || {
            certs.validate_or_generate()?;
            Ok(())
        },
        || Ok(()),
    ))
}

fn register_session_sweep(
    orchestrator: &mut StartupOrchestrator,
    sessions: Arc<SessionTracker>,
    metrics: Arc<MetricsRecorder>,
    interval: Duration,
    handle: Handle,
) -> Result<(), EngineError> {
    let task: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::default();
    let stop_task = Arc::clone(&task);
    orchestrator.register_component(Component::new(
        "session-tracker",
        move || {
            let sessions = Arc::clone(&sessions);
            let metrics = Arc::clone(&metrics);
            *task.lock() = Some(handle.spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    sessions.cleanup_expired_sessions();
                    metrics
                        .active_sessions
                        .set(sessions.stats().active_sessions as f64);
                }
            }));
            Ok(())
        },
        move || {
            if let Some(task) = stop_task.lock().take() {
                task.abort();
            }
            Ok(())
        },
    ))
}

fn register_exporter(
    orchestrator: &mut StartupOrchestrator,
    exporter: Arc<StreamingPcapExporter>,
) -> Result<(), EngineError> {
    let start_exporter = Arc::clone(&exporter);
    orchestrator.register_component(Component::new(
        "pcap-exporter",
        move || {
            start_exporter.start()?;
            Ok(())
        },
        move || {
            exporter.stop();
            Ok(())
        },
    ))
}

fn register_source(
    orchestrator: &mut StartupOrchestrator,
    source: Arc<CaptureSource>,
) -> Result<(), EngineError> {
    let name = source.name();
    let start_source = Arc::clone(&source);
    orchestrator.register_component(Component::new(
        name,
        move || {
            start_source.start()?;
            Ok(())
        },
        move || {
            source.stop();
            Ok(())
        },
    ))
}
