//! Client-side HTTP/1.1 upgrade request build/parse (spec.md §4.5
//! "Client build/parse").

use crate::error::StormError;
use crate::headers::HeaderMap;
use crate::ws::{compute_accept_key, generate_client_key};

/// The request built by [`build_request`] plus the nonce it must be
/// verified against once the server responds.
pub struct ClientHandshakeRequest {
    pub bytes: Vec<u8>,
    pub ws_key: String,
}

/// Builds the client's `GET <path> HTTP/1.1` upgrade request, including
/// a fresh `Sec-WebSocket-Key` nonce and any caller-supplied extra
/// headers (e.g. `Authorization`, `Sec-WebSocket-Protocol`).
pub fn build_request(
    host: &str,
    path: &str,
    extra_headers: &[(String, String)],
) -> ClientHandshakeRequest {
    let ws_key = generate_client_key();
    let mut request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {ws_key}\r\n\
         Sec-WebSocket-Version: 13\r\n"
    );
    for (name, value) in extra_headers {
        request.push_str(name);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");

    ClientHandshakeRequest {
        bytes: request.into_bytes(),
        ws_key,
    }
}

/// Attempts to parse the server's handshake response from the front of
/// `buffer`, consuming it on success. `Ok(None)` means more bytes are
/// needed. Validates the status line and the `Sec-WebSocket-Accept`
/// header against `ws_key`.
pub fn parse_response(buffer: &mut Vec<u8>, ws_key: &str) -> Result<Option<()>, StormError> {
    let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4) else {
        return Ok(None);
    };

    let response_bytes = buffer.drain(..header_end).collect::<Vec<u8>>();
    let text = String::from_utf8_lossy(&response_bytes);
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| StormError::Handshake("empty response".into()))?;
    if !status_line.starts_with("HTTP/1.1 101") {
        return Err(StormError::Handshake(format!(
            "expected HTTP/1.1 101, got: {status_line}"
        )));
    }

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
        return Err(StormError::Handshake("missing Upgrade: websocket".into()));
    }
    if !headers.contains_token("Connection", "upgrade") {
        return Err(StormError::Handshake("missing Connection: Upgrade".into()));
    }

    let expected_accept = compute_accept_key(ws_key);
    match headers.get("Sec-WebSocket-Accept") {
        Some(accept) if accept == expected_accept => Ok(Some(())),
        Some(other) => Err(StormError::Handshake(format!(
            "Sec-WebSocket-Accept mismatch: expected {expected_accept}, got {other}"
        ))),
        None => Err(StormError::Handshake("missing Sec-WebSocket-Accept".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_includes_key_and_extra_headers() {
        let req = build_request(
            "example.com",
            "/chat",
            &[("Sec-WebSocket-Protocol".to_string(), "chat".to_string())],
        );
        let text = String::from_utf8(req.bytes).unwrap();
        assert!(text.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(text.contains(&format!("Sec-WebSocket-Key: {}\r\n", req.ws_key)));
        assert!(text.contains("Sec-WebSocket-Protocol: chat\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn accepts_matching_response() {
        let ws_key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = compute_accept_key(ws_key);
        let mut buf = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes();

        let result = parse_response(&mut buf, ws_key).unwrap();
        assert_eq!(result, Some(()));
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_response_needs_more_bytes() {
        let mut buf = b"HTTP/1.1 101 Switching".to_vec();
        assert_eq!(parse_response(&mut buf, "anything").unwrap(), None);
    }

    #[test]
    fn rejects_wrong_accept_key() {
        let mut buf = b"HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: not-the-right-value\r\n\r\n"
            .to_vec();
        let err = parse_response(&mut buf, "dGhlIHNhbXBsZSBub25jZQ==").unwrap_err();
        assert!(matches!(err, StormError::Handshake(_)));
    }

    #[test]
    fn rejects_non_101_status() {
        let mut buf = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec();
        let err = parse_response(&mut buf, "anything").unwrap_err();
        assert!(matches!(err, StormError::Handshake(_)));
    }
}
