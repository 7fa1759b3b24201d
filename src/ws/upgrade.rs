//! Server-side HTTP/1.1 upgrade parse/build (spec.md §4.5).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StormError;
use crate::headers::HeaderMap;
use crate::ws::compute_accept_key;

/// Why a parsed upgrade request was rejected before reaching the
/// application's authorization hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeRejection {
    MissingUpgradeHeader,
    MissingConnectionHeader,
    InvalidVersion,
    MissingKey,
    ForbiddenOrigin,
    Malformed(String),
}

impl UpgradeRejection {
    /// `(status, reason)` used to build the HTTP error response
    /// (spec.md §4.5 "Server response builders").
    pub fn status_and_reason(&self) -> (u16, String) {
        match self {
            UpgradeRejection::MissingUpgradeHeader => {
                (400, "Missing or invalid Upgrade header".into())
            }
            UpgradeRejection::MissingConnectionHeader => {
                (400, "Missing or invalid Connection header".into())
            }
            UpgradeRejection::InvalidVersion => (400, "Unsupported Sec-WebSocket-Version".into()),
            UpgradeRejection::MissingKey => (400, "Missing Sec-WebSocket-Key".into()),
            UpgradeRejection::ForbiddenOrigin => (403, "Origin not allowed".into()),
            UpgradeRejection::Malformed(reason) => (400, reason.clone()),
        }
    }
}

/// Parsed HTTP upgrade request handed to an authorization hook; may be
/// accepted or rejected exactly once (spec.md §3 "WsUpgradeContext").
pub struct WsUpgradeContext {
    pub path: String,
    pub query_string: Option<String>,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub ws_key: String,
    pub remote_endpoint: Option<SocketAddr>,
    handled: AtomicBool,
    decision: std::sync::Mutex<Option<UpgradeDecision>>,
}

#[derive(Debug, Clone)]
pub(crate) enum UpgradeDecision {
    Accept,
    Reject { status: u16, reason: Option<String> },
}

impl WsUpgradeContext {
    /// Accepts the upgrade. Fails if `accept`/`reject` was already
    /// called (spec.md §7 "Context double-handle").
    pub fn accept(&self) -> Result<(), StormError> {
        self.handle(UpgradeDecision::Accept)
    }

    /// Rejects the upgrade with an arbitrary status code and reason
    /// (e.g. 401, 403, 404, 429).
    pub fn reject(&self, status: u16, reason: impl Into<String>) -> Result<(), StormError> {
        self.handle(UpgradeDecision::Reject {
            status,
            reason: Some(reason.into()),
        })
    }

    fn handle(&self, decision: UpgradeDecision) -> Result<(), StormError> {
        if self.handled.swap(true, Ordering::SeqCst) {
            return Err(StormError::ContextAlreadyHandled);
        }
        *self.decision.lock().unwrap() = Some(decision);
        Ok(())
    }

    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::SeqCst)
    }

    pub(crate) fn decision(&self) -> Option<UpgradeDecision> {
        self.decision.lock().unwrap().clone()
    }
}

/// Attempts to parse a full HTTP/1.1 upgrade request from the front of
/// `buffer`, consuming it on success. `Ok(None)` means the
/// `\r\n\r\n` terminator hasn't arrived yet.
pub fn parse_server_request(
    buffer: &mut Vec<u8>,
    remote_endpoint: Option<SocketAddr>,
    allowed_origins: &[String],
) -> Result<Option<WsUpgradeContext>, UpgradeRejection> {
    let Some(header_end) = find_header_end(buffer) else {
        return Ok(None);
    };

    let request_bytes = buffer.drain(..header_end).collect::<Vec<u8>>();
    let text = String::from_utf8_lossy(&request_bytes);
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| UpgradeRejection::Malformed("empty request".into()))?;
    let mut parts = request_line.split_whitespace();
    let _method = parts
        .next()
        .ok_or_else(|| UpgradeRejection::Malformed("missing method".into()))?;
    let target = parts
        .next()
        .ok_or_else(|| UpgradeRejection::Malformed("missing request target".into()))?;

    let (path, query_string) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };
    let query = parse_query_string(query_string.as_deref());

    let mut headers = HeaderMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim(), value.trim().to_string());
        }
    }

    if !headers.eq_ignore_ascii_case("Upgrade", "websocket") {
        return Err(UpgradeRejection::MissingUpgradeHeader);
    }
    if !headers.contains_token("Connection", "upgrade") {
        return Err(UpgradeRejection::MissingConnectionHeader);
    }
    if headers.get("Sec-WebSocket-Version") != Some("13") {
        return Err(UpgradeRejection::InvalidVersion);
    }
    let ws_key = headers
        .get("Sec-WebSocket-Key")
        .ok_or(UpgradeRejection::MissingKey)?
        .to_string();

    if !allowed_origins.is_empty() {
        let allowed = headers
            .get("Origin")
            .map(|origin| {
                allowed_origins
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(origin))
            })
            .unwrap_or(false);
        if !allowed {
            return Err(UpgradeRejection::ForbiddenOrigin);
        }
    }

    Ok(Some(WsUpgradeContext {
        path,
        query_string,
        query,
        headers,
        ws_key,
        remote_endpoint,
        handled: AtomicBool::new(false),
        decision: std::sync::Mutex::new(None),
    }))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_query_string(query: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Some(query) = query else { return map };
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => {
                map.insert(k.to_string(), v.to_string());
            }
            None => {
                map.insert(pair.to_string(), String::new());
            }
        }
    }
    map
}

/// Builds the 101 Switching Protocols success response.
pub fn build_success_response(ws_key: &str) -> Vec<u8> {
    let accept = compute_accept_key(ws_key);
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}

/// Builds an HTTP error response for a rejected upgrade.
pub fn build_error_response(rejection: &UpgradeRejection) -> Vec<u8> {
    let (status, reason) = rejection.status_and_reason();
    build_status_response(status, &reason, matches!(rejection, UpgradeRejection::InvalidVersion))
}

/// Builds an arbitrary-status reject response (spec.md §4.5
/// "Reject (configurable)").
pub fn build_reject_response(status: u16, reason: &str) -> Vec<u8> {
    build_status_response(status, reason, false)
}

fn build_status_response(status: u16, body: &str, include_version_header: bool) -> Vec<u8> {
    let reason_phrase = http_reason_phrase(status);
    let mut response = format!(
        "HTTP/1.1 {status} {reason_phrase}\r\nContent-Length: {}\r\n",
        body.len()
    );
    if include_version_header {
        response.push_str("Sec-WebSocket-Version: 13\r\n");
    }
    response.push_str("\r\n");
    response.push_str(body);
    response.into_bytes()
}

fn http_reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        _ => "Error",
    }
}
