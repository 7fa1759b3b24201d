//! Client connect/handshake/reconnect orchestrators: raw TCP and
//! WebSocket (spec.md §4.11).

pub mod tcp;
pub mod websocket;

pub use tcp::{TcpClient, TcpClientEvents};
pub use websocket::{WsClient, WsClientEvents};

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};

use crate::error::StormError;
use crate::transport::SocketTuning;

/// Resolves `endpoint` to one or more addresses and connects to the
/// first that succeeds, within `connect_timeout` (spec.md §4.11
/// "resolve the URI host to one or more addresses, connect to the
/// first that succeeds").
pub(crate) async fn connect_with_timeout(
    endpoint: &str,
    connect_timeout: Duration,
    tuning: SocketTuning,
) -> Result<(TcpStream, SocketAddr), StormError> {
    let work = async {
        let addrs: Vec<SocketAddr> = lookup_host(endpoint)
            .await
            .map_err(StormError::Transport)?
            .collect();
        if addrs.is_empty() {
            return Err(StormError::Transport(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {endpoint}"),
            )));
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    crate::transport::apply_socket_tuning(&stream, tuning);
                    return Ok((stream, addr));
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(StormError::Transport(last_err.expect(
            "last_err is set whenever the address list was non-empty and every connect failed",
        )))
    };

    match tokio::time::timeout(connect_timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(StormError::Transport(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect to {endpoint} timed out after {connect_timeout:?}"),
        ))),
    }
}
