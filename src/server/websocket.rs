//! WebSocket server orchestrator: the same accept/session lifecycle as
//! [`crate::server::tcp::TcpServer`], plus the HTTP/1.1 upgrade
//! handshake (spec.md §4.10).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::config::WsServerOptions;
use crate::error::StormError;
use crate::group::SessionGroup;
use crate::manager::SessionManager;
use crate::middleware::Pipeline;
use crate::server::bind_listener;
use crate::session::websocket::{Role, WsSessionOptions};
use crate::session::{SessionLike, WsSession};
use crate::shutdown::{Shutdown, ShutdownHandle};
use crate::transport::{apply_socket_tuning, PendingIo, SocketErrorHook, Transport, TransportConfig};
use crate::ws::close::CloseCode;
use crate::ws::upgrade::{
    build_error_response, build_reject_response, build_success_response, parse_server_request,
    UpgradeDecision, WsUpgradeContext,
};

type ConnectingHook = Arc<dyn Fn(&WsUpgradeContext) + Send + Sync>;
type SessionHook = Arc<dyn Fn(Arc<WsSession>) + Send + Sync>;
type MessageHook = Arc<dyn Fn(Arc<WsSession>, Vec<u8>, bool) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(Arc<WsSession>, StormError) + Send + Sync>;

/// Event subscribers for [`WsServer`] (spec.md §6 "Event surface").
#[derive(Default, Clone)]
pub struct WsServerEvents {
    /// Authorization hook. If the context is left unhandled, the
    /// upgrade is auto-accepted (spec.md §4.5 "auto-accept if
    /// unhandled").
    pub on_connecting: Option<ConnectingHook>,
    pub on_connected: Option<SessionHook>,
    pub on_disconnected: Option<SessionHook>,
    pub on_message: Option<MessageHook>,
    pub on_error: Option<ErrorHook>,
    pub on_socket_error: Option<ErrorHook>,
}

/// Listens, performs the WebSocket upgrade handshake, registers
/// sessions, runs the frame loop per connection, and broadcasts
/// (spec.md §4.10).
pub struct WsServer {
    options: WsServerOptions,
    middleware: Pipeline,
    events: WsServerEvents,
    manager: Arc<SessionManager>,
    groups: Arc<SessionGroup>,
    /// Concrete sessions, kept alongside the type-erased `manager` so
    /// shutdown and text-broadcast can reach WebSocket-specific
    /// methods (`send_text`, `close` with a chosen status) that
    /// `SessionLike` doesn't expose (spec.md §4.10 "Shutdown").
    ws_sessions: RwLock<HashMap<u64, Arc<WsSession>>>,
    shutdown: Mutex<Option<ShutdownHandle>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    #[cfg(feature = "tls")]
    tls_acceptor: Mutex<Option<tokio_rustls::TlsAcceptor>>,
}

impl WsServer {
    pub fn new(options: WsServerOptions) -> Self {
        Self {
            options,
            middleware: Pipeline::new(),
            events: WsServerEvents::default(),
            manager: Arc::new(SessionManager::new()),
            groups: Arc::new(SessionGroup::new()),
            ws_sessions: RwLock::new(HashMap::new()),
            shutdown: Mutex::new(None),
            accept_task: Mutex::new(None),
            #[cfg(feature = "tls")]
            tls_acceptor: Mutex::new(None),
        }
    }

    pub fn register_middleware(&mut self, middleware: Arc<dyn crate::middleware::Middleware>) -> &mut Self {
        self.middleware.register(middleware);
        self
    }

    pub fn set_events(&mut self, events: WsServerEvents) -> &mut Self {
        self.events = events;
        self
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn groups(&self) -> &Arc<SessionGroup> {
        &self.groups
    }

    /// Sends a Text frame to every session except `exclude_id`,
    /// concurrently (spec.md §5 "Broadcast dispatches sends in
    /// parallel").
    pub async fn broadcast_text(&self, text: &str, exclude_id: Option<u64>) {
        let sessions: Vec<Arc<WsSession>> = self.ws_sessions.read().unwrap().values().cloned().collect();
        let mut tasks = JoinSet::new();
        for session in sessions {
            if Some(session.id()) == exclude_id {
                continue;
            }
            let as_dyn: Arc<dyn SessionLike> = session.clone();
            let Some(transformed) = self.middleware.on_data_sending(&as_dyn, text.as_bytes().to_vec()) else {
                continue;
            };
            tasks.spawn(async move {
                let text = String::from_utf8_lossy(&transformed).into_owned();
                if let Err(err) = session.send_text(&text).await {
                    debug!(session_id = session.id(), error = %err, "broadcast_text failed");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Sends a Binary frame to every session except `exclude_id`,
    /// concurrently, running the middleware pipeline's
    /// `on_data_sending` stage per recipient first (spec.md §4.9).
    pub async fn broadcast_binary(&self, data: &[u8], exclude_id: Option<u64>) {
        let mut tasks = JoinSet::new();
        for session in self.manager.snapshot() {
            if Some(session.id()) == exclude_id {
                continue;
            }
            let Some(data) = self.middleware.on_data_sending(&session, data.to_vec()) else {
                continue;
            };
            tasks.spawn(async move {
                let _ = session.send(&data).await;
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    pub async fn start(self: Arc<Self>) -> Result<(), StormError> {
        self.options.validate()?;

        #[cfg(feature = "tls")]
        if let Some(tls) = &self.options.tcp.tls {
            *self.tls_acceptor.lock().unwrap() = Some(tls.build_acceptor()?);
        }

        let listener = bind_listener(&self.options.tcp.endpoint, self.options.tcp.dual_mode).await?;
        let (handle, shutdown) = ShutdownHandle::new();
        *self.shutdown.lock().unwrap() = Some(handle);

        let server = self.clone();
        let task = tokio::spawn(async move {
            server.accept_loop(listener, shutdown).await;
        });
        *self.accept_task.lock().unwrap() = Some(task);
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: tokio::net::TcpListener, mut shutdown: Shutdown) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, remote) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "websocket accept failed");
                    continue;
                }
            };

            if self.options.tcp.max_connections > 0
                && self.manager.count() >= self.options.tcp.max_connections
            {
                debug!(remote = %remote, "rejecting connection: max_connections reached");
                drop(stream);
                continue;
            }

            apply_socket_tuning(&stream, self.options.tcp.socket_tuning);
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, remote).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, remote: std::net::SocketAddr) {
        let transport_config = TransportConfig {
            max_pending_receive_bytes: self.options.tcp.max_pending_receive_bytes,
            max_pending_send_bytes: self.options.tcp.max_pending_send_bytes,
        };

        let session_slot: Arc<std::sync::Mutex<Option<Arc<WsSession>>>> =
            Arc::new(std::sync::Mutex::new(None));
        let socket_error_hook: Option<SocketErrorHook> = self.events.on_socket_error.clone().map(|hook| {
            let slot = session_slot.clone();
            Arc::new(move |err: StormError| {
                if let Some(session) = slot.lock().unwrap().clone() {
                    hook(session, err);
                }
            }) as SocketErrorHook
        });

        #[cfg(feature = "tls")]
        let pending = match self.tls_acceptor.lock().unwrap().clone() {
            Some(acceptor) => PendingIo::TlsServer(stream, acceptor),
            None => PendingIo::Plain(stream),
        };
        #[cfg(not(feature = "tls"))]
        let pending = PendingIo::Plain(stream);

        let transport = Arc::new(Transport::new(pending, Some(remote), transport_config, socket_error_hook));
        if let Err(err) = transport.handshake().await {
            warn!(remote = %remote, error = %err, "websocket transport handshake failed");
            return;
        }

        let ctx = match read_upgrade_request(
            &transport,
            remote,
            &self.options.allowed_origins,
            self.options.handshake_timeout,
        )
        .await
        {
            Ok(ctx) => ctx,
            Err(err) => {
                debug!(remote = %remote, error = %err, "websocket upgrade failed");
                let _ = transport.close().await;
                return;
            }
        };

        if let Some(hook) = &self.events.on_connecting {
            hook(&ctx);
        }
        if !ctx.is_handled() {
            let _ = ctx.accept();
        }

        match ctx.decision() {
            Some(UpgradeDecision::Reject { status, reason }) => {
                let body = reason.unwrap_or_default();
                let response = build_reject_response(status, &body);
                let _ = transport.write_and_flush(&response).await;
                let _ = transport.close().await;
                return;
            }
            _ => {
                let response = build_success_response(&ctx.ws_key);
                if transport.write_and_flush(&response).await.is_err() {
                    let _ = transport.close().await;
                    return;
                }
            }
        }

        let session = WsSession::new(
            transport.clone(),
            self.options.tcp.slow_consumer_policy,
            WsSessionOptions {
                role: Role::Server,
                max_frame_size: self.options.max_frame_size,
                auto_pong: self.options.heartbeat.auto_pong,
                ping_interval: self.options.heartbeat.ping_interval,
                max_missed_pongs: self.options.heartbeat.max_missed_pongs,
            },
        );
        session.core().mark_connected();
        *session_slot.lock().unwrap() = Some(session.clone());

        let as_dyn: Arc<dyn SessionLike> = session.clone();
        self.manager.try_add(as_dyn.clone());
        self.ws_sessions.write().unwrap().insert(session.id(), session.clone());
        self.middleware.on_connected(&as_dyn);
        if let Some(hook) = &self.events.on_connected {
            hook(session.clone());
        }

        let middleware = &self.middleware;
        let message_hook = self.events.on_message.clone();
        let error_hook = self.events.on_error.clone();
        let session_for_loop = session.clone();
        let transport_for_read = transport.clone();

        let result = session
            .run(
                || {
                    let transport = transport_for_read.clone();
                    async move { transport.read(64 * 1024).await }
                },
                |data, is_text| {
                    let session = session_for_loop.clone();
                    let as_dyn: Arc<dyn SessionLike> = session.clone();
                    let message_hook = message_hook.clone();
                    async move {
                        if let Some(forwarded) = middleware.on_data_received(&as_dyn, data) {
                            if let Some(hook) = &message_hook {
                                hook(session, forwarded, is_text);
                            }
                        }
                    }
                },
            )
            .await;

        if let Err(err) = result {
            if !err.is_benign_disconnect() {
                warn!(remote = %remote, error = %err, "websocket session error");
                self.middleware.on_error(&as_dyn, &err);
                if let Some(hook) = &error_hook {
                    hook(session.clone(), err);
                }
            }
        }

        let _ = session.close(CloseCode::NormalClosure).await;
        self.manager.try_remove(session.id());
        self.ws_sessions.write().unwrap().remove(&session.id());
        self.groups.remove_from_all(&as_dyn);
        self.middleware.on_disconnected(&as_dyn);
        if let Some(hook) = &self.events.on_disconnected {
            hook(session.clone());
        }
    }

    /// Cancels the accept loop, closes the listener, sends a
    /// GoingAway Close frame to every session and closes them
    /// (spec.md §4.10 "Shutdown").
    pub async fn stop(&self) {
        if let Some(handle) = self.shutdown.lock().unwrap().take() {
            handle.cancel();
        }
        let task = self.accept_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        let sessions: Vec<Arc<WsSession>> =
            std::mem::take(&mut *self.ws_sessions.write().unwrap()).into_values().collect();
        let mut tasks = JoinSet::new();
        for session in sessions {
            tasks.spawn(async move {
                let _ = session.close(CloseCode::GoingAway).await;
            });
        }
        while tasks.join_next().await.is_some() {}
        self.manager.close_all().await;
    }
}

async fn read_upgrade_request(
    transport: &Transport,
    remote: std::net::SocketAddr,
    allowed_origins: &[String],
    handshake_timeout: Duration,
) -> Result<WsUpgradeContext, StormError> {
    let work = async {
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            match parse_server_request(&mut buffer, Some(remote), allowed_origins) {
                Ok(Some(ctx)) => return Ok(ctx),
                Ok(None) => {}
                Err(rejection) => {
                    let response = build_error_response(&rejection);
                    let _ = transport.write_and_flush(&response).await;
                    return Err(StormError::Handshake(format!("{rejection:?}")));
                }
            }

            let chunk = transport.read(4096).await;
            if chunk.is_empty() {
                return Err(StormError::Handshake("connection closed during upgrade".into()));
            }
            buffer.extend_from_slice(&chunk);
        }
    };

    match tokio::time::timeout(handshake_timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(StormError::HandshakeTimeout),
    }
}
