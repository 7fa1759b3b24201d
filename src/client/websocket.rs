//! WebSocket client orchestrator: connect, HTTP/1.1 upgrade,
//! heartbeat, frame loop, auto-reconnect (spec.md §4.11 "WebSocket
//! connect").

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::connect_with_timeout;
use crate::config::WsClientOptions;
use crate::error::StormError;
use crate::session::websocket::{Role, WsSessionOptions};
use crate::session::{SendOutcome, SessionState, WsSession};
use crate::shutdown::{Shutdown, ShutdownHandle};
use crate::transport::{PendingIo, Transport, TransportConfig};
use crate::ws::client_handshake::{build_request, parse_response};
use crate::ws::close::CloseCode;

type SessionHook = Arc<dyn Fn(Arc<WsSession>) + Send + Sync>;
type MessageHook = Arc<dyn Fn(Arc<WsSession>, Vec<u8>, bool) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(Arc<WsSession>, StormError) + Send + Sync>;
type ReconnectingHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Event subscribers for [`WsClient`] (spec.md §6 "Client event
/// surface").
#[derive(Default, Clone)]
pub struct WsClientEvents {
    pub on_connected: Option<SessionHook>,
    pub on_disconnected: Option<SessionHook>,
    pub on_message: Option<MessageHook>,
    pub on_error: Option<ErrorHook>,
    pub on_reconnecting: Option<ReconnectingHook>,
}

struct ParsedUri {
    tls: bool,
    host: String,
    port: u16,
    path_and_query: String,
}

/// Parses `scheme://host[:port][/path][?query]` for `ws`/`wss`. Not a
/// general-purpose URI parser: only what the client handshake needs
/// (spec.md §4.11 "resolve the URI host... send the upgrade request").
fn parse_ws_uri(uri: &str) -> Result<ParsedUri, StormError> {
    let (tls, rest) = if let Some(rest) = uri.strip_prefix("wss://") {
        (true, rest)
    } else if let Some(rest) = uri.strip_prefix("ws://") {
        (false, rest)
    } else {
        return Err(StormError::Config(format!(
            "unsupported websocket uri scheme: {uri}"
        )));
    };

    let (authority, path_and_query) = match rest.find('/') {
        Some(idx) => (&rest[..idx], rest[idx..].to_string()),
        None => (rest, "/".to_string()),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| StormError::Config(format!("invalid port in uri: {uri}")))?;
            (host.to_string(), port)
        }
        None => (authority.to_string(), if tls { 443 } else { 80 }),
    };

    Ok(ParsedUri { tls, host, port, path_and_query })
}

/// Connects to a `ws://`/`wss://` endpoint, performs the HTTP/1.1
/// upgrade, runs the frame loop, and optionally auto-reconnects
/// (spec.md §4.11).
pub struct WsClient {
    options: WsClientOptions,
    events: WsClientEvents,
    session: RwLock<Option<Arc<WsSession>>>,
    shutdown: std::sync::Mutex<Option<ShutdownHandle>>,
    run_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Bytes read past the upgrade response's `\r\n\r\n` terminator
    /// during handshake parsing — the start of the first WebSocket
    /// frame, handed to the frame loop's first synthetic "read" so no
    /// bytes are lost between handshake and frame decode.
    leftover_bytes: std::sync::Mutex<Option<Vec<u8>>>,
}

impl WsClient {
    pub fn new(options: WsClientOptions) -> Self {
        Self {
            options,
            events: WsClientEvents::default(),
            session: RwLock::new(None),
            shutdown: std::sync::Mutex::new(None),
            run_task: std::sync::Mutex::new(None),
            leftover_bytes: std::sync::Mutex::new(None),
        }
    }

    pub fn set_events(&mut self, events: WsClientEvents) -> &mut Self {
        self.events = events;
        self
    }

    pub fn session(&self) -> Option<Arc<WsSession>> {
        self.session.read().unwrap().clone()
    }

    pub fn state(&self) -> SessionState {
        self.session()
            .map(|s| s.core().state())
            .unwrap_or(SessionState::Connecting)
    }

    pub async fn connect(self: Arc<Self>) -> Result<(), StormError> {
        self.options.validate()?;

        let (handle, shutdown) = ShutdownHandle::new();
        *self.shutdown.lock().unwrap() = Some(handle);

        if !self.options.reconnect.enabled {
            let session = self.clone().attempt_connect().await?;
            let client = self.clone();
            let shutdown_for_run = shutdown.clone();
            let task = tokio::spawn(async move {
                client.run_session_to_completion(session, shutdown_for_run).await;
            });
            *self.run_task.lock().unwrap() = Some(task);
            return Ok(());
        }

        let (first_tx, first_rx) = oneshot::channel();
        let client = self.clone();
        let task = tokio::spawn(async move {
            client.reconnect_loop(shutdown, first_tx).await;
        });
        *self.run_task.lock().unwrap() = Some(task);

        first_rx
            .await
            .unwrap_or(Err(StormError::InvalidState("reconnect loop exited without a result")))
    }

    async fn attempt_connect(self: Arc<Self>) -> Result<Arc<WsSession>, StormError> {
        let uri = parse_ws_uri(&self.options.uri)?;
        let endpoint = format!("{}:{}", uri.host, uri.port);
        let (stream, remote) =
            connect_with_timeout(&endpoint, self.options.connect_timeout, self.options.socket_tuning).await?;

        #[cfg(feature = "tls")]
        let pending = if uri.tls {
            let (connector, name) = match &self.options.tls {
                Some(opts) => opts.build_connector()?,
                None => crate::transport::tls::TlsClientOptions::new(uri.host.clone()).build_connector()?,
            };
            PendingIo::TlsClient(stream, connector, name)
        } else {
            PendingIo::Plain(stream)
        };
        #[cfg(not(feature = "tls"))]
        let pending = {
            if uri.tls {
                return Err(StormError::Config(
                    "wss:// requires the `tls` feature to be enabled".into(),
                ));
            }
            PendingIo::Plain(stream)
        };

        let transport = Arc::new(Transport::new(pending, Some(remote), TransportConfig::default(), None));
        transport.handshake().await?;

        let host_header = if (uri.tls && uri.port == 443) || (!uri.tls && uri.port == 80) {
            uri.host.clone()
        } else {
            format!("{}:{}", uri.host, uri.port)
        };
        let request = build_request(&host_header, &uri.path_and_query, &self.options.extra_headers);
        transport.write_and_flush(&request.bytes).await?;

        let mut buffer: Vec<u8> = Vec::new();
        loop {
            if parse_response(&mut buffer, &request.ws_key)?.is_some() {
                break;
            }
            let chunk = transport.read(4096).await;
            if chunk.is_empty() {
                return Err(StormError::Handshake(
                    "connection closed before the upgrade response completed".into(),
                ));
            }
            buffer.extend_from_slice(&chunk);
        }

        // Any bytes past the response header are the first WebSocket
        // frame bytes; hand them to the session's frame loop by
        // re-queuing them as the first "read" below.
        let leftover = buffer;

        let session = WsSession::new(
            transport.clone(),
            crate::session::SlowConsumerPolicy::Wait,
            WsSessionOptions {
                role: Role::Client,
                max_frame_size: self.options.max_frame_size,
                auto_pong: true,
                ping_interval: self.options.heartbeat.ping_interval,
                max_missed_pongs: self.options.heartbeat.max_missed_pongs,
            },
        );
        session.core().mark_connected();
        *self.session.write().unwrap() = Some(session.clone());

        if let Some(hook) = &self.events.on_connected {
            hook(session.clone());
        }

        self.leftover_bytes.lock().unwrap().replace(leftover);
        Ok(session)
    }

    async fn run_session_to_completion(self: Arc<Self>, session: Arc<WsSession>, _shutdown: Shutdown) {
        let message_hook = self.events.on_message.clone();
        let session_for_loop = session.clone();
        let transport = session.core().transport().clone();

        let mut leftover = self.leftover_bytes.lock().unwrap().take().unwrap_or_default();
        let result = session
            .run(
                move || {
                    let transport = transport.clone();
                    let chunk = std::mem::take(&mut leftover);
                    async move {
                        if !chunk.is_empty() {
                            return chunk;
                        }
                        transport.read(64 * 1024).await
                    }
                },
                |data, is_text| {
                    let session = session_for_loop.clone();
                    let message_hook = message_hook.clone();
                    async move {
                        if let Some(hook) = &message_hook {
                            hook(session, data, is_text);
                        }
                    }
                },
            )
            .await;

        if let Err(err) = result {
            if !err.is_benign_disconnect() {
                warn!(error = %err, "websocket client session error");
                if let Some(hook) = &self.events.on_error {
                    hook(session.clone(), err);
                }
            }
        }

        let _ = session.close(CloseCode::NormalClosure).await;
        *self.session.write().unwrap() = None;
        if let Some(hook) = &self.events.on_disconnected {
            hook(session);
        }
    }

    async fn reconnect_loop(
        self: Arc<Self>,
        mut shutdown: Shutdown,
        first_tx: oneshot::Sender<Result<(), StormError>>,
    ) {
        let mut first_tx = Some(first_tx);
        let mut attempt: u32 = 0;

        loop {
            match self.clone().attempt_connect().await {
                Ok(session) => {
                    attempt = 0;
                    if let Some(tx) = first_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                    self.clone().run_session_to_completion(session, shutdown.clone()).await;
                }
                Err(err) => {
                    debug!(error = %err, "websocket client connect attempt failed");
                }
            }

            if shutdown.is_cancelled() {
                return;
            }

            attempt += 1;
            if self.options.reconnect.max_attempts > 0 && attempt > self.options.reconnect.max_attempts {
                if let Some(tx) = first_tx.take() {
                    let _ = tx.send(Err(StormError::InvalidState("max_attempts_exceeded")));
                }
                return;
            }

            let delay = self.options.reconnect.delay;
            if let Some(hook) = &self.events.on_reconnecting {
                hook(attempt, delay);
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<SendOutcome, StormError> {
        let session = self.session().ok_or(StormError::InvalidState("not connected"))?;
        session.send_text(text).await
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<SendOutcome, StormError> {
        let session = self.session().ok_or(StormError::InvalidState("not connected"))?;
        session.send_binary(data).await
    }

    pub async fn close(&self) {
        if let Some(handle) = self.shutdown.lock().unwrap().take() {
            handle.cancel();
        }
        let task = self.run_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if let Some(session) = self.session() {
            let _ = session.close(CloseCode::NormalClosure).await;
        }
        *self.session.write().unwrap() = None;
    }
}
