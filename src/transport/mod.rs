//! Transport: a bidirectional byte stream with bounded buffers and a
//! handshake hook (spec.md §4.1). Plaintext and TLS variants share the
//! same pump-task machinery; only how the raw I/O object is obtained
//! differs.

#[cfg(feature = "tls")]
pub mod tls;

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::buffer::PressureBuffer;
use crate::error::{is_benign_io_error, StormError};

/// Socket tuning knobs applied right after `accept`/`connect`
/// (spec.md §6 `socket_tuning`).
#[derive(Debug, Clone, Copy)]
pub struct SocketTuning {
    pub no_delay: bool,
    pub keep_alive: bool,
}

impl Default for SocketTuning {
    fn default() -> Self {
        Self {
            no_delay: false,
            keep_alive: true,
        }
    }
}

pub fn apply_socket_tuning(stream: &TcpStream, tuning: SocketTuning) {
    if let Err(err) = stream.set_nodelay(tuning.no_delay) {
        debug!(error = %err, "failed to set TCP_NODELAY");
    }
    // Keepalive is platform-specific to configure with fine granularity
    // without an extra dependency; `set_nodelay` is the portable knob
    // tokio exposes directly. Keep-alive is advisory.
    let _ = tuning.keep_alive;
}

/// A raw, already-negotiated bidirectional stream. Both plaintext and
/// TLS streams erase to this so the pump tasks only need one code path.
pub enum RawIo {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    TlsServer(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    #[cfg(feature = "tls")]
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for RawIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawIo::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            RawIo::TlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            RawIo::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for RawIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            RawIo::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            RawIo::TlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            RawIo::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawIo::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            RawIo::TlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(feature = "tls")]
            RawIo::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            RawIo::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            RawIo::TlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            RawIo::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Not-yet-negotiated I/O: plaintext is already "negotiated" (a no-op
/// handshake), TLS variants carry what's needed to negotiate lazily
/// inside `Transport::handshake`.
pub enum PendingIo {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    TlsServer(TcpStream, tokio_rustls::TlsAcceptor),
    #[cfg(feature = "tls")]
    TlsClient(TcpStream, tokio_rustls::TlsConnector, ::rustls::ServerName),
}

/// Socket-error hook: invoked with errors that are not benign/expected
/// disconnects (spec.md §4.1 "Socket-error policy").
pub type SocketErrorHook = Arc<dyn Fn(StormError) + Send + Sync>;

pub struct TransportConfig {
    pub max_pending_receive_bytes: usize,
    pub max_pending_send_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_pending_receive_bytes: 1 << 20,
            max_pending_send_bytes: 1 << 20,
        }
    }
}

/// A bidirectional byte stream with bounded in-memory buffers
/// (spec.md §4.1). Plaintext or TLS-wrapped; once `handshake()`
/// completes, both behave identically.
pub struct Transport {
    pending: Mutex<Option<PendingIo>>,
    started: AtomicBool,
    remote_endpoint: Option<SocketAddr>,
    inbound: Arc<PressureBuffer>,
    outbound: Arc<PressureBuffer>,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    on_socket_error: Option<SocketErrorHook>,
}

impl Transport {
    pub fn new(
        pending: PendingIo,
        remote_endpoint: Option<SocketAddr>,
        config: TransportConfig,
        on_socket_error: Option<SocketErrorHook>,
    ) -> Self {
        Self {
            pending: Mutex::new(Some(pending)),
            started: AtomicBool::new(false),
            remote_endpoint,
            inbound: Arc::new(PressureBuffer::new(config.max_pending_receive_bytes)),
            outbound: Arc::new(PressureBuffer::new(config.max_pending_send_bytes)),
            closed: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
            on_socket_error,
        }
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.remote_endpoint
    }

    /// Performs TLS negotiation (if any) and starts the internal
    /// read/write pump tasks. Idempotent: subsequent calls are no-ops.
    pub async fn handshake(&self) -> Result<(), StormError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let pending = self.pending.lock().unwrap().take();
        let io = match pending {
            Some(PendingIo::Plain(stream)) => RawIo::Plain(stream),
            #[cfg(feature = "tls")]
            Some(PendingIo::TlsServer(stream, acceptor)) => {
                let tls = acceptor.accept(stream).await.map_err(|e| {
                    StormError::Handshake(format!("TLS server handshake failed: {e}"))
                })?;
                RawIo::TlsServer(Box::new(tls))
            }
            #[cfg(feature = "tls")]
            Some(PendingIo::TlsClient(stream, connector, name)) => {
                let tls = connector.connect(name, stream).await.map_err(|e| {
                    StormError::Handshake(format!("TLS client handshake failed: {e}"))
                })?;
                RawIo::TlsClient(Box::new(tls))
            }
            None => return Ok(()),
        };

        let (mut read_half, mut write_half) = tokio::io::split(io);
        let inbound = self.inbound.clone();
        let outbound = self.outbound.clone();
        let closed = self.closed.clone();
        let hook_read = self.on_socket_error.clone();
        let hook_write = self.on_socket_error.clone();

        let read_task = tokio::spawn(async move {
            let mut chunk = vec![0u8; 16 * 1024];
            loop {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                match read_half.read(&mut chunk).await {
                    Ok(0) => {
                        inbound.close();
                        break;
                    }
                    Ok(n) => {
                        if inbound.push(&chunk[..n]).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        inbound.close();
                        if !is_benign_io_error(&err) {
                            warn!(error = %err, "transport read error");
                            if let Some(hook) = &hook_read {
                                hook(StormError::Transport(err));
                            }
                        }
                        break;
                    }
                }
            }
        });

        let write_task = tokio::spawn(async move {
            loop {
                let chunk = outbound.pop(64 * 1024).await;
                if chunk.is_empty() {
                    // `pop` only returns empty once the buffer is closed
                    // and fully drained.
                    break;
                }
                if let Err(err) = write_half.write_all(&chunk).await {
                    if !is_benign_io_error(&err) {
                        warn!(error = %err, "transport write error");
                        if let Some(hook) = &hook_write {
                            hook(StormError::Transport(err));
                        }
                    }
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        self.tasks.lock().unwrap().push(read_task);
        self.tasks.lock().unwrap().push(write_task);
        Ok(())
    }

    /// Pulls up to `max` bytes out of the inbound buffer. An empty
    /// result means EOF.
    pub async fn read(&self, max: usize) -> Vec<u8> {
        self.inbound.pop(max).await
    }

    /// Writes `data` to the outbound buffer and reports whether this
    /// call suspended due to backpressure (spec.md §4.3).
    pub async fn write_and_flush(&self, data: &[u8]) -> Result<bool, StormError> {
        self.outbound.push(data).await
    }

    pub fn is_backpressured(&self) -> bool {
        self.outbound.is_backpressured()
    }

    /// Graceful shutdown of both directions. Safe to call concurrently
    /// with in-flight loops; returns once the pump tasks have exited.
    pub async fn close(&self) -> Result<(), StormError> {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound.close();
        self.outbound.close();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}
