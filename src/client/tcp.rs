//! Raw TCP client orchestrator: connect, frame loop, auto-reconnect
//! (spec.md §4.11 "TCP connect", "Auto-reconnect").

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::connect_with_timeout;
use crate::config::TcpClientOptions;
use crate::error::StormError;
use crate::framing::{Framer, RawFramer};
use crate::session::{SendOutcome, SessionState, TcpSession};
use crate::shutdown::{Shutdown, ShutdownHandle};
use crate::transport::{PendingIo, Transport, TransportConfig};

type SessionHook = Arc<dyn Fn(Arc<TcpSession>) + Send + Sync>;
type DataReceivedHook = Arc<dyn Fn(Arc<TcpSession>, Vec<u8>) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(Arc<TcpSession>, StormError) + Send + Sync>;
type ReconnectingHook = Arc<dyn Fn(u32, Duration) + Send + Sync>;

/// Event subscribers for [`TcpClient`] (spec.md §6 "Client:
/// connected, disconnected, data_received, error, reconnecting").
#[derive(Default, Clone)]
pub struct TcpClientEvents {
    pub on_connected: Option<SessionHook>,
    pub on_disconnected: Option<SessionHook>,
    pub on_data_received: Option<DataReceivedHook>,
    pub on_error: Option<ErrorHook>,
    pub on_reconnecting: Option<ReconnectingHook>,
}

/// Connects to a raw TCP endpoint, runs the framed read/write loop,
/// and optionally auto-reconnects on disconnect (spec.md §4.11).
pub struct TcpClient {
    options: TcpClientOptions,
    framer: Arc<dyn Framer>,
    events: TcpClientEvents,
    session: RwLock<Option<Arc<TcpSession>>>,
    shutdown: std::sync::Mutex<Option<ShutdownHandle>>,
    run_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    #[cfg(feature = "tls")]
    tls_connector: std::sync::Mutex<Option<(tokio_rustls::TlsConnector, rustls::ServerName)>>,
}

impl TcpClient {
    pub fn new(options: TcpClientOptions) -> Self {
        Self {
            options,
            framer: Arc::new(RawFramer),
            events: TcpClientEvents::default(),
            session: RwLock::new(None),
            shutdown: std::sync::Mutex::new(None),
            run_task: std::sync::Mutex::new(None),
            #[cfg(feature = "tls")]
            tls_connector: std::sync::Mutex::new(None),
        }
    }

    pub fn set_framer(&mut self, framer: Arc<dyn Framer>) -> &mut Self {
        self.framer = framer;
        self
    }

    pub fn set_events(&mut self, events: TcpClientEvents) -> &mut Self {
        self.events = events;
        self
    }

    pub fn session(&self) -> Option<Arc<TcpSession>> {
        self.session.read().unwrap().clone()
    }

    pub fn state(&self) -> SessionState {
        self.session()
            .map(|s| s.core().state())
            .unwrap_or(SessionState::Connecting)
    }

    /// Connects (and, with reconnect enabled, keeps reconnecting in
    /// the background). Resolves once the *first* connect attempt
    /// succeeds or permanently fails (spec.md §4.11 "On first
    /// successful connect, complete the caller's outstanding
    /// `connect()` future").
    pub async fn connect(self: Arc<Self>) -> Result<(), StormError> {
        self.options.validate()?;

        #[cfg(feature = "tls")]
        if let Some(tls) = &self.options.tls {
            *self.tls_connector.lock().unwrap() = Some(tls.build_connector()?);
        }

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

    async fn attempt_connect(self: Arc<Self>) -> Result<Arc<TcpSession>, StormError> {
        let (stream, remote) =
            connect_with_timeout(&self.options.endpoint, self.options.connect_timeout, self.options.socket_tuning)
                .await?;

        #[cfg(feature = "tls")]
        let pending = match self.tls_connector.lock().unwrap().clone() {
            Some((connector, name)) => PendingIo::TlsClient(stream, connector, name),
            None => PendingIo::Plain(stream),
        };
        #[cfg(not(feature = "tls"))]
        let pending = PendingIo::Plain(stream);

        let transport = Arc::new(Transport::new(pending, Some(remote), TransportConfig::default(), None));
        transport.handshake().await?;

        let session = Arc::new(TcpSession::new(
            transport,
            self.framer.clone(),
            crate::session::SlowConsumerPolicy::Wait,
        ));
        session.core().mark_connected();
        *self.session.write().unwrap() = Some(session.clone());

        if let Some(hook) = &self.events.on_connected {
            hook(session.clone());
        }
        Ok(session)
    }

    async fn run_session_to_completion(self: Arc<Self>, session: Arc<TcpSession>, shutdown: Shutdown) {
        let data_hook = self.events.on_data_received.clone();
        let session_for_loop = session.clone();

        let result = session
            .run(shutdown, |message| {
                let session = session_for_loop.clone();
                let data_hook = data_hook.clone();
                async move {
                    if let Some(hook) = &data_hook {
                        hook(session, message);
                    }
                }
            })
            .await;

        if let Err(err) = result {
            if !err.is_benign_disconnect() {
                warn!(error = %err, "tcp client session error");
                if let Some(hook) = &self.events.on_error {
                    hook(session.clone(), err);
                }
            }
        }

        let _ = session.close().await;
        *self.session.write().unwrap() = None;
        if let Some(hook) = &self.events.on_disconnected {
            hook(session);
        }
    }

    /// Wraps connect + run in a loop: on disconnect (including a
    /// failed connect attempt), waits `delay` and retries, firing
    /// `on_reconnecting` first and giving up once `max_attempts` is
    /// exceeded (spec.md §4.11 "Auto-reconnect").
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
                    debug!(error = %err, "tcp client connect attempt failed");
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

    /// Frames and sends `data` through the current session. Fails if
    /// not connected (spec.md §7 "Invalid state").
    pub async fn send(&self, data: &[u8]) -> Result<SendOutcome, StormError> {
        let session = self
            .session()
            .ok_or(StormError::InvalidState("not connected"))?;
        session.send(data).await
    }

    /// Cancels the connect/reconnect loop and closes the active
    /// session, if any.
    pub async fn close(&self) {
        if let Some(handle) = self.shutdown.lock().unwrap().take() {
            handle.cancel();
        }
        let task = self.run_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if let Some(session) = self.session() {
            let _ = session.close().await;
        }
        *self.session.write().unwrap() = None;
    }
}
