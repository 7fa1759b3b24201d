//! WebSocket session: frame encode/decode plus heartbeat on top of
//! [`SessionCore`] (spec.md §3 "WebSocket Session", §4.10).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::StormError;
use crate::session::{SendOutcome, SessionCore, SessionLike, SlowConsumerPolicy};
use crate::transport::Transport;
use crate::ws::close::CloseCode;
use crate::ws::frame::{decode, encode, OpCode, WsFrame};
use crate::ws::heartbeat::Heartbeat;

/// Whether this session originates masked (client) or unmasked
/// (server) frames (spec.md §4.4 "Encode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    fn masks_outbound(self) -> bool {
        matches!(self, Role::Client)
    }
}

pub struct WsSessionOptions {
    pub role: Role,
    pub max_frame_size: usize,
    pub auto_pong: bool,
    pub ping_interval: Duration,
    pub max_missed_pongs: u32,
}

impl Default for WsSessionOptions {
    fn default() -> Self {
        Self {
            role: Role::Server,
            max_frame_size: 1 << 20,
            auto_pong: true,
            ping_interval: Duration::from_secs(30),
            max_missed_pongs: 3,
        }
    }
}

/// A live WebSocket endpoint: frame codec plus heartbeat wired on top
/// of [`SessionCore`]'s identity, metrics and write serialization.
pub struct WsSession {
    core: SessionCore,
    role: Role,
    max_frame_size: usize,
    auto_pong: bool,
    heartbeat: AsyncMutex<Heartbeat>,
    heartbeat_timed_out: Arc<AtomicBool>,
}

impl WsSession {
    pub fn new(transport: Arc<Transport>, policy: SlowConsumerPolicy, opts: WsSessionOptions) -> Arc<Self> {
        let session = Arc::new(Self {
            core: SessionCore::new(transport, policy),
            role: opts.role,
            max_frame_size: opts.max_frame_size,
            auto_pong: opts.auto_pong,
            heartbeat: AsyncMutex::new(Heartbeat::new()),
            heartbeat_timed_out: Arc::new(AtomicBool::new(false)),
        });

        if !opts.ping_interval.is_zero() {
            let for_ping = session.clone();
            let for_timeout = session.clone();
            let masked = opts.role.masks_outbound();
            // `Heartbeat::start` spawns its own task; the callbacks here
            // must not block, so pings are handed off via `tokio::spawn`.
            let send_ping = move |frame: WsFrame| {
                let session = for_ping.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    encode(&frame, masked, &mut buf);
                    let _ = session.core.write_locked_always(&buf).await;
                });
            };
            let on_timeout = move || {
                for_timeout.heartbeat_timed_out.store(true, Ordering::SeqCst);
                for_timeout.abort();
            };
            // Starting requires `&mut Heartbeat`; this only runs once,
            // before the session is shared further, so `try_lock` always
            // succeeds here.
            if let Ok(mut hb) = session.heartbeat.try_lock() {
                hb.start(opts.ping_interval, opts.max_missed_pongs, send_ping, on_timeout);
            }
        }

        session
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn heartbeat_timed_out(&self) -> bool {
        self.heartbeat_timed_out.load(Ordering::SeqCst)
    }

    fn encode_and_send(&self, mut frame: WsFrame) -> impl Future<Output = Result<SendOutcome, StormError>> + '_ {
        frame.masked = self.role.masks_outbound();
        let mut buf = Vec::new();
        encode(&frame, frame.masked, &mut buf);
        async move { self.core.guarded_write(&buf).await }
    }

    pub async fn send_text(&self, text: &str) -> Result<SendOutcome, StormError> {
        self.encode_and_send(WsFrame::text(text.as_bytes().to_vec())).await
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<SendOutcome, StormError> {
        self.encode_and_send(WsFrame::binary(data.to_vec())).await
    }

    async fn write_control_frame(&self, frame: WsFrame) -> Result<(), StormError> {
        let masked = self.role.masks_outbound();
        let mut buf = Vec::new();
        encode(&frame, masked, &mut buf);
        self.core.write_locked_always(&buf).await
    }

    /// Decodes and dispatches frames as they arrive off the wire,
    /// invoking `on_message(data, is_text)` for Text/Binary frames.
    /// Handles Ping/Pong/Close per spec.md §4.10 "Frame handling".
    pub async fn run<R, RFut, F, Fut>(&self, mut read: R, mut on_message: F) -> Result<(), StormError>
    where
        R: FnMut() -> RFut,
        RFut: Future<Output = Vec<u8>>,
        F: FnMut(Vec<u8>, bool) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = read().await;
            if chunk.is_empty() {
                return Ok(());
            }
            buffer.extend_from_slice(&chunk);

            loop {
                let frame = match decode(&mut buffer, self.max_frame_size) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(StormError::Protocol(status, reason)) => {
                        let _ = self.write_control_frame(WsFrame::close(status)).await;
                        return Err(StormError::Protocol(status, reason));
                    }
                    Err(err) => return Err(err),
                };

                match frame.opcode {
                    OpCode::Text | OpCode::Binary => {
                        self.core.record_received(frame.payload.len());
                        on_message(frame.payload, frame.opcode == OpCode::Text).await;
                    }
                    OpCode::Ping => {
                        if self.auto_pong {
                            let _ = self.write_control_frame(WsFrame::pong(frame.payload)).await;
                        }
                    }
                    OpCode::Pong => {
                        self.heartbeat.lock().await.on_pong_received();
                    }
                    OpCode::Close => {
                        // Echo the peer's status (spec.md §4.10: "echo
                        // a Close with the peer's status"); `close`
                        // writes that frame once via `close_once`.
                        let status = frame.close_status();
                        self.close(status).await?;
                        return Ok(());
                    }
                    OpCode::Continuation => {
                        return Err(StormError::Protocol(
                            CloseCode::ProtocolError,
                            "fragmented messages are not supported".into(),
                        ));
                    }
                }
            }
        }
    }

    /// Graceful close: emits a Close frame (spec.md default status
    /// 1000), flushes, then closes the transport and disposes the
    /// heartbeat (spec.md §4.7).
    pub async fn close(&self, status: CloseCode) -> Result<(), StormError> {
        let result = self
            .core
            .close_once(|| async { self.write_control_frame(WsFrame::close(status)).await })
            .await;
        self.heartbeat.lock().await.dispose().await;
        result
    }

    pub fn abort(&self) {
        self.core.abort();
        if let Ok(mut hb) = self.heartbeat.try_lock() {
            hb.cancel_without_joining();
        }
    }
}

impl SessionLike for WsSession {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    fn send<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<SendOutcome, StormError>> + Send + 'a>> {
        Box::pin(self.send_binary(data))
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), StormError>> + Send + 'a>> {
        Box::pin(self.close(CloseCode::NormalClosure))
    }
}
