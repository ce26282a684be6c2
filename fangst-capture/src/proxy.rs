//! TLS-intercepting proxy.
//!
//! Clients connect with HTTP CONNECT, get a locally-issued leaf for the
//! requested host, and are relayed to the real upstream over a verified
//! TLS connection. Decrypted traffic flows through the exporter in both
//! directions; one [`FlowRecord`] is emitted per tunnel when it closes.
//!
//! A client that aborts the handshake (it does not trust the CA) counts
//! toward pinning detection for that host instead of producing a flow.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fangst_core::session::SessionTracker;
use fangst_storage::{ExportStatus, StreamingPcapExporter};
use fangst_tls::CertificateManager;

use crate::error::CaptureError;
use crate::http;
use crate::pinning::PinningDetector;
use crate::record::{CaptureEvent, EventSink, FlowRecord};

const CONNECT_HEAD_LIMIT: usize = 8 * 1024;
const RELAY_BUF: usize = 16 * 1024;
/// Bytes accumulated per direction while waiting for a complete HTTP
/// head; anything past this is treated as unparseable.
const HEAD_CAPTURE_LIMIT: usize = 16 * 1024;

pub struct ProxySettings {
    pub listen: String,
    pub port: u16,
}

struct ProxyShared {
    certs: Arc<CertificateManager>,
    sessions: Arc<SessionTracker>,
    exporter: Arc<StreamingPcapExporter>,
    pinning: Arc<PinningDetector>,
    sink: Arc<dyn EventSink>,
}

/// Accepts CONNECT tunnels and intercepts them.
pub struct InterceptProxy {
    settings: ProxySettings,
    shared: Arc<ProxyShared>,
    handle: Handle,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl InterceptProxy {
    pub fn new(
        settings: ProxySettings,
        certs: Arc<CertificateManager>,
        sessions: Arc<SessionTracker>,
        exporter: Arc<StreamingPcapExporter>,
        pinning: Arc<PinningDetector>,
        sink: Arc<dyn EventSink>,
        handle: Handle,
    ) -> Self {
        Self {
            settings,
            shared: Arc::new(ProxyShared {
                certs,
                sessions,
                exporter,
                pinning,
                sink,
            }),
            handle,
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bound address once started; useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Binds the listener synchronously so the failure is attributable,
    /// then runs the accept loop on the runtime.
    pub fn start(&self) -> Result<(), CaptureError> {
        if self.accept_task.lock().is_some() {
            return Err(CaptureError::AlreadyRunning);
        }
        let addr = format!("{}:{}", self.settings.listen, self.settings.port);
        let listener = std::net::TcpListener::bind(&addr).map_err(|source| CaptureError::Bind {
            addr: addr.clone(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| CaptureError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr().map_err(|source| CaptureError::Bind {
            addr: addr.clone(),
            source,
        })?;
        *self.local_addr.lock() = Some(local);

        let shared = Arc::clone(&self.shared);
        let task = self.handle.spawn(async move {
            let listener = match tokio::net::TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(error = %err, "Proxy listener registration failed");
                    return;
                }
            };
            // Tunnels live in the set, so aborting the accept task drops
            // it and aborts every live tunnel with it.
            let mut tunnels = tokio::task::JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let shared = Arc::clone(&shared);
                            tunnels.spawn(async move {
                                if let Err(err) = handle_connection(shared, stream, peer).await {
                                    debug!(peer = %peer, error = %err, "Tunnel ended with error");
                                }
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, "Accept failed");
                        }
                    },
                    Some(_) = tunnels.join_next(), if !tunnels.is_empty() => {}
                }
            }
        });
        *self.accept_task.lock() = Some(task);
        info!(addr = %local, "Intercepting proxy started");
        Ok(())
    }

    /// Aborts the accept loop and every live tunnel, closing their
    /// sockets.
    pub fn stop(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        info!("Intercepting proxy stopped");
    }
}

/// Parsed CONNECT request line plus the User-Agent, if any.
struct ConnectRequest {
    host: String,
    port: u16,
    user_agent: Option<String>,
}

fn parse_connect(head: &[u8]) -> Result<ConnectRequest, CaptureError> {
    let request = http::parse_request_head(head)
        .ok_or_else(|| CaptureError::InvalidConnect("incomplete request head".into()))?;
    if request.method != "CONNECT" {
        return Err(CaptureError::InvalidConnect(format!(
            "expected CONNECT, got {}",
            request.method
        )));
    }
    let (host, port) = request
        .target
        .rsplit_once(':')
        .ok_or_else(|| CaptureError::InvalidConnect("target missing port".into()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| CaptureError::InvalidConnect(format!("bad port in '{}'", request.target)))?;
    if host.is_empty() {
        return Err(CaptureError::InvalidConnect("empty host".into()));
    }
    Ok(ConnectRequest {
        host: host.to_string(),
        port,
        user_agent: http::header(&request.headers, "user-agent").map(str::to_string),
    })
}

async fn read_connect_head(stream: &mut TcpStream) -> Result<Vec<u8>, CaptureError> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await.map_err(|source| CaptureError::Io {
            path: "proxy-client".into(),
            source,
        })?;
        if n == 0 {
            return Err(CaptureError::InvalidConnect("client closed early".into()));
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > CONNECT_HEAD_LIMIT {
            return Err(CaptureError::InvalidConnect("request head too large".into()));
        }
    }
}

async fn handle_connection(
    shared: Arc<ProxyShared>,
    mut client: TcpStream,
    peer: SocketAddr,
) -> Result<(), CaptureError> {
    let head = read_connect_head(&mut client).await?;
    let connect = parse_connect(&head)?;
    let started_at = Utc::now();

    let session_id = shared.sessions.get_or_create_session(
        peer.ip(),
        connect.user_agent.clone(),
        None,
    );

    client
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await
        .map_err(|source| CaptureError::Io {
            path: "proxy-client".into(),
            source,
        })?;

    // Terminate the client's TLS with our leaf for the host.
    let server_config = shared.certs.server_config_for(&connect.host)?;
    let acceptor = TlsAcceptor::from(server_config);
    let mut client_tls = match acceptor.accept(client).await {
        Ok(tls) => tls,
        Err(err) => {
            debug!(host = %connect.host, error = %err, "Client handshake failed");
            if let Some(failures) = shared.pinning.record_failure(&connect.host) {
                shared.sink.emit(CaptureEvent::PinnedHost {
                    host: connect.host.clone(),
                    failures,
                });
            }
            return Ok(());
        }
    };

    // Re-originate upstream with real verification.
    let upstream = TcpStream::connect((connect.host.as_str(), connect.port))
        .await
        .map_err(|source| CaptureError::Io {
            path: format!("{}:{}", connect.host, connect.port).into(),
            source,
        })?;
    let connector = TlsConnector::from(shared.certs.upstream_client_config());
    let server_name = ServerName::try_from(connect.host.clone())
        .map_err(|_| CaptureError::InvalidConnect(format!("bad host '{}'", connect.host)))?;
    let mut upstream_tls = connector
        .connect(server_name, upstream)
        .await
        .map_err(|source| CaptureError::Io {
            path: connect.host.clone().into(),
            source,
        })?;

    let mut flow = FlowRecord {
        flow_id: Uuid::new_v4(),
        session_id,
        client: peer.ip(),
        host: connect.host.clone(),
        method: None,
        target: None,
        status: None,
        user_agent: connect.user_agent,
        cookie_names: Vec::new(),
        auth_scheme: None,
        request_bytes: 0,
        response_bytes: 0,
        started_at,
        finished_at: started_at,
    };

    relay(&shared, &mut client_tls, &mut upstream_tls, &mut flow).await;

    flow.finished_at = Utc::now();
    info!(
        flow_id = %flow.flow_id,
        host = %flow.host,
        request_bytes = flow.request_bytes,
        response_bytes = flow.response_bytes,
        status = ?flow.status,
        "Flow completed"
    );
    shared.sink.emit(CaptureEvent::Flow(flow));
    Ok(())
}

/// Pumps bytes in both directions until either side closes, recording
/// each chunk through the exporter and the first heads into the flow.
async fn relay<C, U>(
    shared: &ProxyShared,
    client: &mut C,
    upstream: &mut U,
    flow: &mut FlowRecord,
) where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    U: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut client_buf = vec![0u8; RELAY_BUF];
    let mut upstream_buf = vec![0u8; RELAY_BUF];
    // Heads can arrive split across reads, so each direction accumulates
    // until a blank line or the capture limit.
    let mut request_head = Vec::new();
    let mut response_head = Vec::new();
    let mut request_parsed = false;
    let mut response_parsed = false;

    loop {
        tokio::select! {
            read = client.read(&mut client_buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&client_buf[..n]);
                        if !request_parsed {
                            request_head.extend_from_slice(&chunk);
                            if let Some(head) = http::parse_request_head(&request_head) {
                                flow.method = Some(head.method.clone());
                                flow.target = Some(head.target.clone());
                                flow.cookie_names = http::cookie_names(&head.headers);
                                flow.auth_scheme = http::auth_scheme(&head.headers);
                                if flow.user_agent.is_none() {
                                    flow.user_agent =
                                        http::header(&head.headers, "user-agent").map(str::to_string);
                                }
                                request_parsed = true;
                                request_head = Vec::new();
                            } else if request_head.len() > HEAD_CAPTURE_LIMIT {
                                request_parsed = true;
                                request_head = Vec::new();
                            }
                        }
                        flow.request_bytes += n as u64;
                        export_chunk(shared, chunk).await;
                        if upstream.write_all(&client_buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            read = upstream.read(&mut upstream_buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&upstream_buf[..n]);
                        if !response_parsed {
                            response_head.extend_from_slice(&chunk);
                            if let Some(head) = http::parse_response_head(&response_head) {
                                flow.status = Some(head.status);
                                response_parsed = true;
                                response_head = Vec::new();
                            } else if response_head.len() > HEAD_CAPTURE_LIMIT {
                                response_parsed = true;
                                response_head = Vec::new();
                            }
                        }
                        flow.response_bytes += n as u64;
                        export_chunk(shared, chunk).await;
                        if client.write_all(&upstream_buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn export_chunk(shared: &ProxyShared, chunk: Bytes) {
    match shared.exporter.export_packet(chunk, SystemTime::now()) {
        Ok(ExportStatus::Paused) => shared.exporter.wait_for_capacity().await,
        Ok(_) => {}
        Err(err) => warn!(error = %err, "Exporter refused chunk"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::Path;
    use std::time::Duration;

    use fangst_core::buffer::RingBuffer;
    use fangst_core::secrets::MemorySecretStore;
    use fangst_storage::{DiskSpaceMonitor, DiskThresholds, OverflowPolicy, RotationPolicy};
    use fangst_telemetry::MetricsRecorder;

    use crate::pinning::FailurePolicy;
    use crate::record::{AuthScheme, ChannelEventSink};

    fn proxy_shared(dir: &Path, handle: Handle) -> Arc<ProxyShared> {
        let buffer = Arc::new(RingBuffer::with_capacity_mb(1).unwrap());
        let disk = Arc::new(DiskSpaceMonitor::new(
            dir,
            DiskThresholds::default(),
            Duration::from_secs(30),
            handle.clone(),
        ));
        let exporter = Arc::new(StreamingPcapExporter::new(
            buffer,
            disk,
            Arc::new(MetricsRecorder::new()),
            dir,
            RotationPolicy::default(),
            OverflowPolicy::Retain,
            handle,
        ));
        let (sink, _events) = ChannelEventSink::channel();
        let sink: Arc<dyn EventSink> = sink;
        Arc::new(ProxyShared {
            certs: Arc::new(CertificateManager::new(
                dir,
                Arc::new(MemorySecretStore::new()),
            )),
            sessions: Arc::new(SessionTracker::with_timeout_secs(3600)),
            exporter,
            pinning: Arc::new(PinningDetector::new(FailurePolicy::default())),
            sink,
        })
    }

    fn blank_flow() -> FlowRecord {
        FlowRecord {
            flow_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            client: IpAddr::V4(Ipv4Addr::LOCALHOST),
            host: "example.com".into(),
            method: None,
            target: None,
            status: None,
            user_agent: None,
            cookie_names: Vec::new(),
            auth_scheme: None,
            request_bytes: 0,
            response_bytes: 0,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn stop_closes_live_tunnels() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let proxy = InterceptProxy {
            settings: ProxySettings {
                listen: "127.0.0.1".into(),
                port: 0,
            },
            shared: proxy_shared(dir.path(), rt.handle().clone()),
            handle: rt.handle().clone(),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        };
        proxy.start().unwrap();
        let addr = proxy.local_addr().unwrap();

        // Partial CONNECT head parks the tunnel task in its read loop.
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client.write_all(b"CONNECT example.com:443").unwrap();
        std::thread::sleep(Duration::from_millis(100));

        proxy.stop();

        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 16];
        match client.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => panic!("unexpected {n} bytes after stop"),
            Err(err) => assert!(
                !matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ),
                "tunnel still open after stop: {err}"
            ),
        }
    }

    #[tokio::test]
    async fn relay_parses_head_split_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let shared = proxy_shared(dir.path(), Handle::current());
        let (mut client_remote, mut client_side) = tokio::io::duplex(1024);
        let (upstream_remote, mut upstream_side) = tokio::io::duplex(1024);

        let relay_task = tokio::spawn(async move {
            let mut flow = blank_flow();
            relay(&shared, &mut client_side, &mut upstream_side, &mut flow).await;
            flow
        });

        client_remote
            .write_all(b"GET /account HTTP/1.1\r\nAuthori")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client_remote
            .write_all(b"zation: Bearer abc123\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(client_remote);
        drop(upstream_remote);

        let flow = relay_task.await.unwrap();
        assert_eq!(flow.method.as_deref(), Some("GET"));
        assert_eq!(flow.target.as_deref(), Some("/account"));
        assert_eq!(flow.auth_scheme, Some(AuthScheme::Bearer));
        assert_eq!(flow.request_bytes, 55);
    }

    #[test]
    fn parses_connect_request() {
        let head = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\
            User-Agent: test-agent\r\n\r\n";
        let connect = parse_connect(head).unwrap();
        assert_eq!(connect.host, "example.com");
        assert_eq!(connect.port, 443);
        assert_eq!(connect.user_agent.as_deref(), Some("test-agent"));
    }

    #[test]
    fn rejects_non_connect() {
        let head = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert!(matches!(
            parse_connect(head),
            Err(CaptureError::InvalidConnect(_))
        ));
    }

    #[test]
    fn rejects_missing_port() {
        let head = b"CONNECT example.com HTTP/1.1\r\n\r\n";
        assert!(parse_connect(head).is_err());
        let head = b"CONNECT example.com:notaport HTTP/1.1\r\n\r\n";
        assert!(parse_connect(head).is_err());
    }
}
