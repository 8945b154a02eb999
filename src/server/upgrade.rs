//! Protocol-upgrade negotiation (`Connection: Upgrade`).
//!
//! This module computes the handshake response for an upgrade request — today, only the
//! WebSocket handshake defined by [RFC 6455 Section
//! 4.2.2](https://datatracker.ietf.org/doc/html/rfc6455#section-4.2.2) — and hands the
//! live socket off to an application-registered [`ProtocolHandlerFactory`] once the `101`
//! response has gone out. What happens to the connection after that (framing, ping/pong,
//! close handshake) is entirely the factory's responsibility; this crate's job ends at the
//! handshake.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};
use std::{future::Future, pin::Pin, sync::Arc};
use tokio::net::TcpStream;

use crate::Request;

const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a given `Sec-WebSocket-Key`.
///
/// Per RFC 6455 §4.2.2: concatenate the client key with the WebSocket GUID, SHA-1 hash
/// the result, and base64-encode the digest.
pub struct WebSocketAccept;

impl WebSocketAccept {
    /// Returns the base64-encoded `Sec-WebSocket-Accept` value, or `None` if `key` isn't
    /// valid UTF-8 (the header value is copied verbatim from the request by the caller,
    /// so a non-UTF-8 key indicates a malformed handshake).
    pub fn compute(key: &[u8]) -> Option<String> {
        if key.is_empty() {
            return None;
        }

        let mut hasher = Sha1::new();
        hasher.update(key);
        hasher.update(WEBSOCKET_GUID);
        let digest = hasher.finalize();

        Some(STANDARD.encode(digest))
    }
}

/// A boxed, pinned future returned by a [`ProtocolHandlerFactory`]; the connection worker
/// awaits it to completion and then tears the connection down.
pub type UpgradeFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Takes ownership of a connection after a successful protocol upgrade.
///
/// Implementors typically wrap `stream` in a framing codec (e.g. a WebSocket frame
/// reader/writer) and drive it to completion; the returned future is polled to
/// completion by the connection worker, which then closes the socket.
pub trait ProtocolHandlerFactory: Send + Sync {
    /// Begins handling `stream` after the `101 Switching Protocols` response for `request`
    /// has been flushed.
    fn handle(&self, request: &Request, stream: TcpStream) -> UpgradeFuture;
}

/// Registry mapping upgrade requests to the factory that should take over the connection.
///
/// Owned by a [`crate::Server`]/[`crate::ServerBuilder`] instance — there is no process-wide
/// registry, so two servers in the same process can register different upgrade handling.
#[derive(Clone, Default)]
pub struct ConnectionUpgrader {
    websocket: Option<Arc<dyn ProtocolHandlerFactory>>,
}

impl std::fmt::Debug for ConnectionUpgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionUpgrader")
            .field("websocket_registered", &self.websocket.is_some())
            .finish()
    }
}

impl ConnectionUpgrader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory that takes over a connection after a successful WebSocket
    /// handshake. Replaces any previously registered factory.
    pub fn with_websocket(mut self, factory: impl ProtocolHandlerFactory + 'static) -> Self {
        self.websocket = Some(Arc::new(factory));
        self
    }

    pub(crate) fn websocket_factory(&self) -> Option<&Arc<dyn ProtocolHandlerFactory>> {
        self.websocket.as_ref()
    }

    /// Whether `request` is a well-formed WebSocket upgrade request this crate recognizes:
    /// `Connection: Upgrade`, `Upgrade: websocket`, and a non-empty `Sec-WebSocket-Key`.
    pub(crate) fn is_websocket_upgrade(request: &Request) -> bool {
        let has_upgrade_token = request
            .header(b"connection")
            .is_some_and(|v| contains_token_ci(v, b"upgrade"));
        let is_websocket = request
            .header(b"upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case(b"websocket"));

        has_upgrade_token && is_websocket
    }
}

/// `Connection` is comma-separated and case-insensitive per RFC 9110 §7.6.1; `contains`
/// alone would false-positive on e.g. `Connection: keep-alive-upgrade-thing`.
fn contains_token_ci(header_value: &[u8], token: &[u8]) -> bool {
    header_value
        .split(|&b| b == b',')
        .map(|s| trim_ascii(s))
        .any(|s| s.eq_ignore_ascii_case(token))
}

fn trim_ascii(s: &[u8]) -> &[u8] {
    let s = match s.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(i) => &s[i..],
        None => return &[],
    };
    match s.iter().rposition(|b| !b.is_ascii_whitespace()) {
        Some(i) => &s[..=i],
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_matches_rfc6455_example() {
        // The worked example from RFC 6455 Section 1.3.
        let accept = WebSocketAccept::compute(b"dGhlIHNhbXBsZSBub25jZQ==").unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn empty_key_rejected() {
        assert_eq!(WebSocketAccept::compute(b""), None);
    }

    #[test]
    fn contains_token_ci_handles_comma_list() {
        assert!(contains_token_ci(b"keep-alive, Upgrade", b"upgrade"));
        assert!(!contains_token_ci(b"keep-alive", b"upgrade"));
    }
}
