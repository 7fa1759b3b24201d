//! Crate-wide error taxonomy.
//!
//! One [`StormError`] enum covers every failure bucket described in the
//! error handling design: protocol violations (which carry a WebSocket
//! close status), transport I/O, configuration, invalid operation
//! ordering, and framing.

use std::io;

use crate::ws::close::CloseCode;

/// The single error type returned by fallible StormSocket operations.
#[derive(Debug, thiserror::Error)]
pub enum StormError {
    /// A WebSocket protocol violation. Carries the close status the
    /// core sends back to the peer before dropping the connection.
    #[error("websocket protocol error ({0:?}): {1}")]
    Protocol(CloseCode, String),

    /// The transport's underlying byte stream failed for a reason other
    /// than an expected/benign disconnect.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A configuration value was out of range at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation was attempted in a state that forbids it (e.g.
    /// `send` before `connect`).
    #[error("invalid operation: {0}")]
    InvalidState(&'static str),

    /// An upgrade context's `accept`/`reject` was called a second time.
    #[error("upgrade context already handled")]
    ContextAlreadyHandled,

    /// A framer could not make sense of the bytes it was given.
    #[error("framing error: {0}")]
    Framing(String),

    /// The HTTP/1.1 upgrade handshake could not be completed.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// The server is at `max_connections` and rejected the socket
    /// before any handshake was attempted.
    #[error("max connections reached")]
    MaxConnections,

    /// The server-side upgrade's handshake_timeout elapsed before the
    /// request was fully parsed.
    #[error("handshake timed out")]
    HandshakeTimeout,
}

impl StormError {
    /// True for errors that represent an expected, quiet disconnect
    /// rather than a genuine fault (see Transport errors policy,
    /// spec.md §4.1 "Socket-error policy").
    pub fn is_benign_disconnect(&self) -> bool {
        match self {
            StormError::Transport(err) => is_benign_io_error(err),
            _ => false,
        }
    }
}

/// Classifies socket errors that indicate a normal or expected
/// disconnect: these are swallowed to terminate a loop quietly. Any
/// other I/O error is surfaced via `on_socket_error`.
pub fn is_benign_io_error(err: &io::Error) -> bool {
    use io::ErrorKind::*;
    if matches!(
        err.kind(),
        ConnectionReset | ConnectionAborted | ConnectionRefused | UnexpectedEof | BrokenPipe | NotConnected
    ) {
        return true;
    }
    let msg = err.to_string();
    msg.contains("shutdown") || msg.contains("Transport endpoint is not connected")
}
