//! WebSocket protocol engine: frame codec, HTTP/1.1 upgrade
//! parse/build, heartbeat, and close handshake (spec.md §4.4–§4.6).

pub mod close;
pub mod client_handshake;
pub mod frame;
pub mod heartbeat;
pub mod upgrade;

pub use close::CloseCode;
pub use frame::{decode, encode, OpCode, WsFrame};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(SHA1(key || GUID))` (spec.md §4.5 "Accept key").
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// A fresh 16-byte nonce, base64-encoded, for `Sec-WebSocket-Key`
/// (spec.md §4.5 "Client build/parse").
pub fn generate_client_key() -> String {
    use rand::RngCore;
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    BASE64.encode(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_known_answer() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accept_key_is_28_ascii_chars() {
        let key = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(key.len(), 28);
        assert!(key.is_ascii());
    }
}
