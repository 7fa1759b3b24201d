//! PipeConnection: drives a TCP session's inbound loop over a
//! [`Framer`] and a [`Transport`] (spec.md §4.3).
//!
//! Outbound writes for TCP sessions go through
//! [`crate::session::SessionCore::guarded_write`], not through this
//! type — that is where the single per-session write lock and the
//! backpressure-triggered Disconnect policy live (spec.md §4.7).
//! `PipeConnection` only drives the read side.

use std::future::Future;
use std::sync::Arc;

use crate::error::StormError;
use crate::framing::Framer;
use crate::shutdown::Shutdown;
use crate::transport::Transport;

const READ_CHUNK: usize = 64 * 1024;

/// Drives a TCP session's inbound loop: reads from the transport,
/// frames complete messages and dispatches each to a callback.
pub struct PipeConnection {
    transport: Arc<Transport>,
    framer: Arc<dyn Framer>,
}

impl PipeConnection {
    pub fn new(transport: Arc<Transport>, framer: Arc<dyn Framer>) -> Self {
        Self { transport, framer }
    }

    /// Runs the inbound loop until cancellation or EOF, invoking
    /// `on_message` for each complete message in on-wire order.
    pub async fn run<F, Fut>(&self, mut shutdown: Shutdown, mut on_message: F) -> Result<(), StormError>
    where
        F: FnMut(Vec<u8>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                chunk = self.transport.read(READ_CHUNK) => chunk,
            };

            if chunk.is_empty() {
                return Ok(());
            }
            buffer.extend_from_slice(&chunk);

            loop {
                match self.framer.try_read_message(&mut buffer) {
                    Ok(Some(message)) => on_message(message).await,
                    Ok(None) => break,
                    Err(err) => return Err(err),
                }
            }
        }
    }
}
