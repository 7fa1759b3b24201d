//! Configuration surface: `*Options` structs with sensible defaults,
//! validated at construction (spec.md §6 "Configuration surface").

use std::time::Duration;

use crate::error::StormError;
use crate::session::SlowConsumerPolicy;
use crate::transport::SocketTuning;

#[cfg(feature = "tls")]
use crate::transport::tls::{TlsClientOptions, TlsServerOptions};

/// Heartbeat knobs shared by WebSocket server and client sessions
/// (spec.md §6 "WebSocket options").
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatOptions {
    pub ping_interval: Duration,
    pub max_missed_pongs: u32,
    pub auto_pong: bool,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            max_missed_pongs: 3,
            auto_pong: true,
        }
    }
}

/// Auto-reconnect knobs for client orchestrators (spec.md §6, §4.11).
#[derive(Debug, Clone, Copy)]
pub struct ReconnectOptions {
    pub enabled: bool,
    pub delay: Duration,
    /// 0 means unlimited attempts.
    pub max_attempts: u32,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: Duration::from_secs(2),
            max_attempts: 0,
        }
    }
}

/// Raw TCP server configuration (spec.md §6 "Server options").
#[derive(Clone)]
pub struct TcpServerOptions {
    pub endpoint: String,
    pub backlog: u32,
    pub dual_mode: bool,
    pub receive_buffer: usize,
    pub send_buffer: usize,
    pub max_pending_receive_bytes: usize,
    pub max_pending_send_bytes: usize,
    /// 0 means unlimited.
    pub max_connections: usize,
    pub slow_consumer_policy: SlowConsumerPolicy,
    pub socket_tuning: SocketTuning,
    #[cfg(feature = "tls")]
    pub tls: Option<TlsServerOptions>,
}

impl TcpServerOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            backlog: 128,
            dual_mode: false,
            receive_buffer: 65536,
            send_buffer: 65536,
            max_pending_receive_bytes: 1 << 20,
            max_pending_send_bytes: 1 << 20,
            max_connections: 0,
            slow_consumer_policy: SlowConsumerPolicy::Wait,
            socket_tuning: SocketTuning::default(),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    pub fn validate(&self) -> Result<(), StormError> {
        if self.backlog == 0 {
            return Err(StormError::Config("backlog must be greater than zero".into()));
        }
        Ok(())
    }
}

/// WebSocket-specific server configuration layered on top of
/// [`TcpServerOptions`] (spec.md §6 "WebSocket options").
#[derive(Clone)]
pub struct WsServerOptions {
    pub tcp: TcpServerOptions,
    pub heartbeat: HeartbeatOptions,
    pub max_frame_size: usize,
    pub allowed_origins: Vec<String>,
    pub handshake_timeout: Duration,
}

impl WsServerOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            tcp: TcpServerOptions::new(endpoint),
            heartbeat: HeartbeatOptions::default(),
            max_frame_size: 1 << 20,
            allowed_origins: Vec::new(),
            handshake_timeout: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> Result<(), StormError> {
        self.tcp.validate()?;
        if self.max_frame_size == 0 {
            return Err(StormError::Config("max_frame_size must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Raw TCP client configuration (spec.md §6 "Client options").
#[derive(Clone)]
pub struct TcpClientOptions {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub socket_tuning: SocketTuning,
    pub reconnect: ReconnectOptions,
    #[cfg(feature = "tls")]
    pub tls: Option<TlsClientOptions>,
}

impl TcpClientOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(10),
            socket_tuning: SocketTuning::default(),
            reconnect: ReconnectOptions::default(),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    pub fn validate(&self) -> Result<(), StormError> {
        if self.connect_timeout.is_zero() {
            return Err(StormError::Config("connect_timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// WebSocket client configuration (spec.md §6).
#[derive(Clone)]
pub struct WsClientOptions {
    pub uri: String,
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
    pub extra_headers: Vec<(String, String)>,
    pub socket_tuning: SocketTuning,
    pub heartbeat: HeartbeatOptions,
    pub reconnect: ReconnectOptions,
    #[cfg(feature = "tls")]
    pub tls: Option<TlsClientOptions>,
}

impl WsClientOptions {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connect_timeout: Duration::from_secs(10),
            max_frame_size: 1 << 20,
            extra_headers: Vec::new(),
            socket_tuning: SocketTuning::default(),
            heartbeat: HeartbeatOptions::default(),
            reconnect: ReconnectOptions::default(),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    pub fn validate(&self) -> Result<(), StormError> {
        if self.connect_timeout.is_zero() {
            return Err(StormError::Config("connect_timeout must be greater than zero".into()));
        }
        if self.max_frame_size == 0 {
            return Err(StormError::Config("max_frame_size must be greater than zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_match_spec() {
        let opts = TcpServerOptions::new("0.0.0.0:9000");
        assert_eq!(opts.backlog, 128);
        assert!(!opts.dual_mode);
        assert_eq!(opts.max_pending_receive_bytes, 1 << 20);
        assert_eq!(opts.max_connections, 0);
    }

    #[test]
    fn zero_backlog_fails_validation() {
        let mut opts = TcpServerOptions::new("0.0.0.0:9000");
        opts.backlog = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn ws_client_defaults_match_spec() {
        let opts = WsClientOptions::new("ws://localhost:9000/chat");
        assert_eq!(opts.connect_timeout, Duration::from_secs(10));
        assert_eq!(opts.max_frame_size, 1 << 20);
        assert!(!opts.reconnect.enabled);
    }
}
