//! The [`Event`] data model — tagged records exchanged over `receive`
//! (server→app) and `send` (app→server) (spec §3, "Event").
//!
//! The set of recognized variants is closed; a `send` of anything else is a
//! protocol violation (spec §4.1) and is rejected by [`crate::conn::send`]
//! before it ever reaches the wire.

use bytes::Bytes;

use crate::scope::Headers;

/// An event flowing server→app via `receive`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveEvent {
    LifespanStartup,
    LifespanShutdown,
    HttpRequest { body: Bytes, more: bool },
    HttpDisconnect,
    WebSocketConnect,
    WebSocketReceive { message: WsMessage },
    WebSocketDisconnect { code: u16 },
    SseConnect,
    SseDisconnect,
}

/// An event flowing app→server via `send`.
#[derive(Debug, Clone, PartialEq)]
pub enum SendEvent {
    LifespanStartupComplete,
    LifespanStartupFailed { message: String },
    LifespanShutdownComplete,
    LifespanShutdownFailed { message: String },

    HttpResponseStart {
        status: u16,
        headers: Headers,
        trailers: bool,
    },
    HttpResponseBody {
        body: Bytes,
        more: bool,
    },
    HttpResponseTrailers {
        headers: Headers,
    },

    WebSocketAccept {
        subprotocol: Option<String>,
        headers: Headers,
    },
    WebSocketSend {
        message: WsMessage,
    },
    WebSocketClose {
        code: u16,
        reason: Option<String>,
    },

    SseStart {
        status: u16,
        headers: Headers,
    },
    SseSend {
        data: String,
        event: Option<String>,
        id: Option<String>,
        retry: Option<u64>,
    },
    SseComment {
        comment: String,
    },
    SseClose,
}

/// A WebSocket payload: either a text frame (valid UTF-8 by construction) or
/// a binary frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    Text(String),
    Bytes(Bytes),
}

impl SendEvent {
    /// A short, stable name for logging/error messages — never user-facing
    /// protocol text, just a diagnostic label.
    pub fn kind(&self) -> &'static str {
        match self {
            SendEvent::LifespanStartupComplete => "lifespan.startup.complete",
            SendEvent::LifespanStartupFailed { .. } => "lifespan.startup.failed",
            SendEvent::LifespanShutdownComplete => "lifespan.shutdown.complete",
            SendEvent::LifespanShutdownFailed { .. } => "lifespan.shutdown.failed",
            SendEvent::HttpResponseStart { .. } => "http.response.start",
            SendEvent::HttpResponseBody { .. } => "http.response.body",
            SendEvent::HttpResponseTrailers { .. } => "http.response.trailers",
            SendEvent::WebSocketAccept { .. } => "websocket.accept",
            SendEvent::WebSocketSend { .. } => "websocket.send",
            SendEvent::WebSocketClose { .. } => "websocket.close",
            SendEvent::SseStart { .. } => "sse.start",
            SendEvent::SseSend { .. } => "sse.send",
            SendEvent::SseComment { .. } => "sse.comment",
            SendEvent::SseClose => "sse.close",
        }
    }
}
