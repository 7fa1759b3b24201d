//! Raw TCP server orchestrator (spec.md §4.10).

use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TcpServerOptions;
use crate::error::StormError;
use crate::framing::{Framer, RawFramer};
use crate::group::SessionGroup;
use crate::manager::SessionManager;
use crate::middleware::Pipeline;
use crate::server::bind_listener;
use crate::session::{SessionLike, TcpSession};
use crate::shutdown::{Shutdown, ShutdownHandle};
use crate::transport::{apply_socket_tuning, PendingIo, SocketErrorHook, Transport, TransportConfig};

type ConnectedHook = Arc<dyn Fn(Arc<TcpSession>) + Send + Sync>;
type DataReceivedHook = Arc<dyn Fn(Arc<TcpSession>, Vec<u8>) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(Arc<TcpSession>, StormError) + Send + Sync>;

/// Event subscribers for [`TcpServer`] (spec.md §6 "Event surface:
/// connected, disconnected, data_received, error, socket_error").
#[derive(Default, Clone)]
pub struct TcpServerEvents {
    pub on_connected: Option<ConnectedHook>,
    pub on_disconnected: Option<ConnectedHook>,
    pub on_data_received: Option<DataReceivedHook>,
    pub on_error: Option<ErrorHook>,
    pub on_socket_error: Option<ErrorHook>,
}

/// Listens, accepts, registers sessions, runs the read loop per
/// connection, and broadcasts (spec.md §4.10).
pub struct TcpServer {
    options: TcpServerOptions,
    framer: Arc<dyn Framer>,
    middleware: Pipeline,
    events: TcpServerEvents,
    manager: Arc<SessionManager>,
    groups: Arc<SessionGroup>,
    shutdown: Mutex<Option<ShutdownHandle>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    #[cfg(feature = "tls")]
    tls_acceptor: Mutex<Option<tokio_rustls::TlsAcceptor>>,
}

impl TcpServer {
    pub fn new(options: TcpServerOptions) -> Self {
        Self {
            options,
            framer: Arc::new(RawFramer),
            middleware: Pipeline::new(),
            events: TcpServerEvents::default(),
            manager: Arc::new(SessionManager::new()),
            groups: Arc::new(SessionGroup::new()),
            shutdown: Mutex::new(None),
            accept_task: Mutex::new(None),
            #[cfg(feature = "tls")]
            tls_acceptor: Mutex::new(None),
        }
    }

    pub fn set_framer(&mut self, framer: Arc<dyn Framer>) -> &mut Self {
        self.framer = framer;
        self
    }

    pub fn register_middleware(&mut self, middleware: Arc<dyn crate::middleware::Middleware>) -> &mut Self {
        self.middleware.register(middleware);
        self
    }

    pub fn set_events(&mut self, events: TcpServerEvents) -> &mut Self {
        self.events = events;
        self
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn groups(&self) -> &Arc<SessionGroup> {
        &self.groups
    }

    /// Sends `data` to every session except `exclude_id`, running it
    /// through the middleware pipeline's `on_data_sending` stage
    /// per-recipient first (spec.md §4.9: the send stage "may
    /// transform or drop").
    pub async fn broadcast(&self, data: &[u8], exclude_id: Option<u64>) {
        let mut tasks = tokio::task::JoinSet::new();
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

    /// Binds the listener and starts the accept loop in the
    /// background. Returns once the socket is bound.
    pub async fn start(self: Arc<Self>) -> Result<(), StormError> {
        self.options.validate()?;

        #[cfg(feature = "tls")]
        if let Some(tls) = &self.options.tls {
            *self.tls_acceptor.lock().unwrap() = Some(tls.build_acceptor()?);
        }

        let listener = bind_listener(&self.options.endpoint, self.options.dual_mode).await?;
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
                    warn!(error = %err, "tcp accept failed");
                    continue;
                }
            };

            if self.options.max_connections > 0 && self.manager.count() >= self.options.max_connections {
                debug!(remote = %remote, "rejecting connection: max_connections reached");
                drop(stream);
                continue;
            }

            apply_socket_tuning(&stream, self.options.socket_tuning);
            let server = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, remote, shutdown).await;
            });
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote: std::net::SocketAddr,
        shutdown: Shutdown,
    ) {
        let manager = self.manager.clone();

        let transport_config = TransportConfig {
            max_pending_receive_bytes: self.options.max_pending_receive_bytes,
            max_pending_send_bytes: self.options.max_pending_send_bytes,
        };

        // The session doesn't exist until after the transport does, so
        // the socket-error hook closes over a slot it's filled into
        // once the session is constructed.
        let session_slot: Arc<std::sync::Mutex<Option<Arc<TcpSession>>>> =
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

        let transport = Arc::new(Transport::new(
            pending,
            Some(remote),
            transport_config,
            socket_error_hook,
        ));
        if let Err(err) = transport.handshake().await {
            warn!(remote = %remote, error = %err, "tcp transport handshake failed");
            return;
        }

        let session = Arc::new(TcpSession::new(
            transport,
            self.framer.clone(),
            self.options.slow_consumer_policy,
        ));
        session.core().mark_connected();
        *session_slot.lock().unwrap() = Some(session.clone());

        let as_dyn: Arc<dyn SessionLike> = session.clone();
        manager.try_add(as_dyn.clone());
        self.middleware.on_connected(&as_dyn);
        if let Some(hook) = &self.events.on_connected {
            hook(session.clone());
        }

        let middleware = &self.middleware;
        let data_hook = self.events.on_data_received.clone();
        let error_hook = self.events.on_error.clone();
        let session_for_loop = session.clone();

        let result = session
            .run(shutdown, |message| {
                let session = session_for_loop.clone();
                let as_dyn: Arc<dyn SessionLike> = session.clone();
                let data_hook = data_hook.clone();
                async move {
                    if let Some(forwarded) = middleware.on_data_received(&as_dyn, message) {
                        if let Some(hook) = &data_hook {
                            hook(session, forwarded);
                        }
                    }
                }
            })
            .await;

        if let Err(err) = result {
            if !err.is_benign_disconnect() {
                warn!(remote = %remote, error = %err, "tcp session error");
                self.middleware.on_error(&as_dyn, &err);
                if let Some(hook) = &error_hook {
                    hook(session.clone(), err);
                }
            }
        }

        let _ = session.close().await;
        manager.try_remove(session.id());
        self.groups.remove_from_all(&as_dyn);
        self.middleware.on_disconnected(&as_dyn);
        if let Some(hook) = &self.events.on_disconnected {
            hook(session.clone());
        }
    }

    /// Cancels the accept loop, closes the listener, and closes every
    /// active session (spec.md §4.10 "Shutdown").
    pub async fn stop(&self) {
        if let Some(handle) = self.shutdown.lock().unwrap().take() {
            handle.cancel();
        }
        let task = self.accept_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.manager.close_all().await;
    }
}
