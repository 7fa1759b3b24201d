//! Server accept+lifecycle orchestrators: raw TCP and WebSocket
//! (spec.md §4.10).

pub mod tcp;
pub mod websocket;

pub use tcp::{TcpServer, TcpServerEvents};
pub use websocket::{WsServer, WsServerEvents};

use std::io;

use tokio::net::TcpListener;
use tracing::debug;

/// Binds the listening socket. `dual_mode` asks for an IPv6-any bind
/// that also accepts IPv4 connections via IPv4-mapped addresses
/// (spec.md §4.10 "dual-mode listens on IPv6 any and accepts both
/// families"); on most platforms this is the kernel default for a
/// `[::]:port` bind when `IPV6_V6ONLY` hasn't been forced on, which is
/// what `tokio::net::TcpListener` gives you without extra socket
/// tuning beyond what this crate already depends on.
pub(crate) async fn bind_listener(endpoint: &str, dual_mode: bool) -> io::Result<TcpListener> {
    if dual_mode {
        debug!(endpoint, "binding dual-mode listener");
    }
    TcpListener::bind(endpoint).await
}
