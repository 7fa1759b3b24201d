//! Session identity, metrics, write serialization and slow-consumer
//! policy shared by TCP and WebSocket sessions (spec.md §3, §4.7).

pub mod tcp;
pub mod websocket;

pub use tcp::TcpSession;
pub use websocket::WsSession;

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::error::StormError;
use crate::ids::next_session_id;
use crate::transport::Transport;

/// Session lifecycle state. Transitions are monotonic:
/// Connecting → Connected → Closing → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Connecting,
            1 => SessionState::Connected,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Per-session strategy applied when an outbound flush is observed as
/// backpressured (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlowConsumerPolicy {
    #[default]
    Wait,
    Drop,
    Disconnect,
}

/// What happened to a `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped,
    Aborted,
}

/// A point-in-time read of a session's counters (spec.md §3 "metrics").
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub uptime: Duration,
}

/// A session's group membership set, guarded by a local lock; reads
/// return an owned snapshot (spec.md §4.7 "Groups").
#[derive(Default)]
struct GroupSet(Mutex<HashSet<String>>);

impl GroupSet {
    fn join(&self, name: &str) -> bool {
        self.0.lock().unwrap().insert(name.to_string())
    }

    fn leave(&self, name: &str) -> bool {
        self.0.lock().unwrap().remove(name)
    }

    fn snapshot(&self) -> HashSet<String> {
        self.0.lock().unwrap().clone()
    }

    fn take_all(&self) -> HashSet<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// Shared state and write-serialization machinery common to TCP and
/// WebSocket sessions (spec.md §3 "Session (abstract)", §4.7).
pub struct SessionCore {
    id: u64,
    state: AtomicU8,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    connected_at: Instant,
    remote_endpoint: Option<SocketAddr>,
    groups: GroupSet,
    policy: SlowConsumerPolicy,
    close_guard: AtomicBool,
    write_lock: Semaphore,
    transport: Arc<Transport>,
}

impl SessionCore {
    pub fn new(transport: Arc<Transport>, policy: SlowConsumerPolicy) -> Self {
        Self {
            id: next_session_id(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connected_at: Instant::now(),
            remote_endpoint: transport.remote_endpoint(),
            groups: GroupSet::default(),
            policy,
            close_guard: AtomicBool::new(false),
            // Fair semaphore with count 1 (spec.md §9 "the write lock is
            // a fair semaphore with count 1").
            write_lock: Semaphore::new(1),
            transport,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, new: SessionState) {
        self.state.store(new as u8, Ordering::SeqCst);
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.remote_endpoint
    }

    pub fn policy(&self) -> SlowConsumerPolicy {
        self.policy
    }

    pub fn is_backpressured(&self) -> bool {
        self.transport.is_backpressured()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::SeqCst),
            bytes_received: self.bytes_received.load(Ordering::SeqCst),
            uptime: self.connected_at.elapsed(),
        }
    }

    pub fn record_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::SeqCst);
    }

    pub fn groups(&self) -> HashSet<String> {
        self.groups.snapshot()
    }

    pub fn join_group(&self, name: &str) -> bool {
        self.groups.join(name)
    }

    pub fn leave_group(&self, name: &str) -> bool {
        self.groups.leave(name)
    }

    /// Clears and returns this session's group set, for use by
    /// `SessionGroup::remove_from_all` on disconnect.
    pub fn take_all_groups(&self) -> HashSet<String> {
        self.groups.take_all()
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// True once `close_guard` has been set: no further write may enter
    /// the transport (spec.md §3 invariant).
    pub fn is_closed_for_writes(&self) -> bool {
        self.close_guard.load(Ordering::SeqCst)
    }

    /// Sets `close_guard` if unset. Returns `true` exactly once, for
    /// the caller that should actually perform the close/abort work
    /// (spec.md §3 "close_guard": single-shot flag).
    fn try_begin_close(&self) -> bool {
        !self.close_guard.swap(true, Ordering::SeqCst)
    }

    pub fn mark_connected(&self) {
        self.set_state(SessionState::Connected);
    }

    /// Applies the slow-consumer policy, then writes `framed_bytes`
    /// through the single-owner write lock and flushes (spec.md §4.7
    /// "Write serialization", "Slow-consumer policy"). `bytes_sent` is
    /// only incremented after the flush completes successfully.
    pub async fn guarded_write(&self, framed_bytes: &[u8]) -> Result<SendOutcome, StormError> {
        if self.is_closed_for_writes() {
            return Err(StormError::InvalidState(
                "session is closing or already closed",
            ));
        }

        match self.policy {
            SlowConsumerPolicy::Drop if self.transport.is_backpressured() => {
                return Ok(SendOutcome::Dropped);
            }
            SlowConsumerPolicy::Disconnect if self.transport.is_backpressured() => {
                self.abort();
                return Ok(SendOutcome::Aborted);
            }
            _ => {}
        }

        let _permit = self
            .write_lock
            .acquire()
            .await
            .expect("write semaphore is never closed while the session is alive");
        let suspended = self.transport.write_and_flush(framed_bytes).await?;

        if suspended && matches!(self.policy, SlowConsumerPolicy::Disconnect) {
            self.abort();
            return Ok(SendOutcome::Aborted);
        }

        self.bytes_sent
            .fetch_add(framed_bytes.len() as u64, Ordering::SeqCst);
        Ok(SendOutcome::Sent)
    }

    /// Writes a protocol-internal frame (heartbeat ping, auto-pong,
    /// close frame) through the same write lock, bypassing the
    /// Drop/Disconnect slow-consumer policy: these are not
    /// user-initiated `send` calls (spec.md §4.7 distinguishes the
    /// write-serialization critical section, which all writers share,
    /// from the slow-consumer policy, which gates `send`).
    pub async fn write_locked_always(&self, framed_bytes: &[u8]) -> Result<(), StormError> {
        if self.is_closed_for_writes() {
            return Ok(());
        }
        let _permit = self
            .write_lock
            .acquire()
            .await
            .expect("write semaphore is never closed while the session is alive");
        self.transport.write_and_flush(framed_bytes).await?;
        self.bytes_sent
            .fetch_add(framed_bytes.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Single-shot abort: no frame is written; the transport is closed
    /// asynchronously (spec.md §4.7 "abort()").
    pub fn abort(&self) {
        if !self.try_begin_close() {
            return;
        }
        self.set_state(SessionState::Closed);
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let _ = transport.close().await;
        });
    }

    /// Runs `begin` (e.g. writing a graceful-close frame) at most once,
    /// then closes the transport and marks the session Closed. Used by
    /// `TcpSession::close`/`WsSession::close` to share the close_guard
    /// discipline while leaving protocol-specific close behavior to the
    /// caller.
    pub async fn close_once<F, Fut>(&self, begin: F) -> Result<(), StormError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), StormError>>,
    {
        if !self.try_begin_close() {
            return Ok(());
        }
        self.set_state(SessionState::Closing);
        let result = begin().await;
        self.transport.close().await?;
        self.set_state(SessionState::Closed);
        result
    }
}

type BoxedSendFuture<'a> = Pin<Box<dyn Future<Output = Result<SendOutcome, StormError>> + Send + 'a>>;
type BoxedCloseFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StormError>> + Send + 'a>>;

/// Object-safe view of a session used by [`crate::manager::SessionManager`]
/// and [`crate::group::SessionGroup`]. Async methods are manually boxed
/// (the object-safe equivalent of an `async-trait`) so both TCP and
/// WebSocket sessions can live behind one `Arc<dyn SessionLike>`.
pub trait SessionLike: Send + Sync + 'static {
    fn core(&self) -> &SessionCore;

    /// Sends raw application data, framed appropriately for the
    /// session's protocol.
    fn send<'a>(&'a self, data: &'a [u8]) -> BoxedSendFuture<'a>;

    /// Gracefully closes the session (idempotent).
    fn close<'a>(&'a self) -> BoxedCloseFuture<'a>;

    fn id(&self) -> u64 {
        self.core().id()
    }

    fn state(&self) -> SessionState {
        self.core().state()
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.core().remote_endpoint()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.core().metrics()
    }

    fn is_backpressured(&self) -> bool {
        self.core().is_backpressured()
    }

    fn groups(&self) -> HashSet<String> {
        self.core().groups()
    }

    fn join_group(&self, name: &str) {
        self.core().join_group(name);
    }

    fn leave_group(&self, name: &str) {
        self.core().leave_group(name);
    }

    fn abort(&self) {
        self.core().abort();
    }
}
