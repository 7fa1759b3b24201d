//! Raw TCP session: identity/metrics/policy via [`SessionCore`], framed
//! over a user-chosen [`Framer`] (spec.md §3 "TCP Session").

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::StormError;
use crate::framing::Framer;
use crate::pipe::PipeConnection;
use crate::session::{SendOutcome, SessionCore, SessionLike, SlowConsumerPolicy};
use crate::shutdown::Shutdown;
use crate::transport::Transport;

/// A live TCP endpoint framed with a pluggable [`Framer`].
pub struct TcpSession {
    core: SessionCore,
    framer: Arc<dyn Framer>,
    pipe: PipeConnection,
}

impl TcpSession {
    pub fn new(transport: Arc<Transport>, framer: Arc<dyn Framer>, policy: SlowConsumerPolicy) -> Self {
        let pipe = PipeConnection::new(transport.clone(), framer.clone());
        Self {
            core: SessionCore::new(transport, policy),
            framer,
            pipe,
        }
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    /// Frames `data` and writes it through the session's write lock,
    /// honoring the slow-consumer policy (spec.md §4.7).
    pub async fn send(&self, data: &[u8]) -> Result<SendOutcome, StormError> {
        let mut framed = Vec::with_capacity(data.len() + 8);
        self.framer.write_frame(data, &mut framed);
        self.core.guarded_write(&framed).await
    }

    /// Runs the inbound loop, invoking `on_message` for each complete
    /// message, and updating `bytes_received` (spec.md §4.10 step 7).
    pub async fn run<F, Fut>(&self, shutdown: Shutdown, mut on_message: F) -> Result<(), StormError>
    where
        F: FnMut(Vec<u8>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let core = &self.core;
        self.pipe
            .run(shutdown, |message| {
                core.record_received(message.len());
                on_message(message)
            })
            .await
    }

    /// Graceful close: no frame is written for raw TCP, the transport
    /// is simply closed (spec.md §4.7).
    pub async fn close(&self) -> Result<(), StormError> {
        self.core.close_once(|| async { Ok(()) }).await
    }

    pub fn abort(&self) {
        self.core.abort();
    }
}

impl SessionLike for TcpSession {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    fn send<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<SendOutcome, StormError>> + Send + 'a>> {
        Box::pin(self.send(data))
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), StormError>> + Send + 'a>> {
        Box::pin(self.close())
    }
}
