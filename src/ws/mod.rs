//! WebSocket upgrade handshake (spec §5.1; RFC 6455 §1.3, §4.2.2).
//!
//! Grounded on `examples/Field-of-Dreams-Studio-hotaru/h2per/src/websocket.rs`'s
//! `generate_accept_key` (SHA-1 over the client key concatenated with the
//! RFC 6455 GUID, base64-encoded). Frame encoding/decoding itself is not
//! reimplemented here — it is delegated to `tokio-tungstenite`
//! ([`crate::conn::receive`], [`crate::conn::send`]), per spec §9.

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::scope::{header_value, Headers};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// True if the request headers carry a well-formed WebSocket upgrade
/// request: `Upgrade: websocket`, `Connection: Upgrade` (order-insensitive,
/// possibly one of several comma-separated tokens), and a `Sec-WebSocket-Key`.
pub(crate) fn is_upgrade_request(headers: &Headers) -> bool {
    let upgrade_is_websocket = header_value(headers, "upgrade")
        .map(|v| v.eq_ignore_ascii_case(b"websocket"))
        .unwrap_or(false);
    let connection_has_upgrade = header_value(headers, "connection")
        .map(|v| {
            String::from_utf8_lossy(v)
                .split(',')
                .any(|tok| tok.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);
    let has_key = header_value(headers, "sec-websocket-key").is_some();
    upgrade_is_websocket && connection_has_upgrade && has_key
}

/// Compute the `Sec-WebSocket-Accept` value for a given `Sec-WebSocket-Key`.
pub(crate) fn accept_key(client_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key);
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Requested subprotocols, in client-offered order (`Sec-WebSocket-Protocol`
/// is a comma-separated list; spec §3, "websocket scope").
pub(crate) fn requested_subprotocols(headers: &Headers) -> Vec<String> {
    header_value(headers, "sec-websocket-protocol")
        .map(|v| {
            String::from_utf8_lossy(v)
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn accept_key_matches_the_rfc_6455_worked_example() {
        // RFC 6455 §1.3's worked example.
        assert_eq!(accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn detects_a_well_formed_upgrade_request() {
        let headers: Headers = vec![
            (Bytes::from_static(b"upgrade"), Bytes::from_static(b"websocket")),
            (Bytes::from_static(b"connection"), Bytes::from_static(b"keep-alive, Upgrade")),
            (Bytes::from_static(b"sec-websocket-key"), Bytes::from_static(b"dGhlIHNhbXBsZSBub25jZQ==")),
        ];
        assert!(is_upgrade_request(&headers));
    }

    #[test]
    fn rejects_a_request_missing_the_key() {
        let headers: Headers = vec![
            (Bytes::from_static(b"upgrade"), Bytes::from_static(b"websocket")),
            (Bytes::from_static(b"connection"), Bytes::from_static(b"Upgrade")),
        ];
        assert!(!is_upgrade_request(&headers));
    }

    #[test]
    fn parses_comma_separated_subprotocols() {
        let headers: Headers = vec![(
            Bytes::from_static(b"sec-websocket-protocol"),
            Bytes::from_static(b"chat, superchat"),
        )];
        assert_eq!(requested_subprotocols(&headers), vec!["chat", "superchat"]);
    }
}
