//! Error and Result types.
//!
//! The taxonomy mirrors §7 of the gateway specification: configuration errors are
//! fatal at supervisor construction, protocol errors are scoped to one connection,
//! and lifespan errors are reported through the lifespan event protocol itself
//! rather than through this type (see [`crate::lifespan`]).

use std::fmt;

/// Result type returned from fallible gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A callback invoked, alongside the standard `tracing::error!` log line,
/// whenever an uncaught application error terminates a connection's scope
/// call (`Config::on_error`).
pub type OnError = std::sync::Arc<dyn Fn(&Error) + Send + Sync>;

/// Errors that can occur while running the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Raised at supervisor construction: conflicting bind configuration,
    /// an unsupported TLS scheme, or a malformed inherited-socket environment
    /// variable.
    #[error("configuration error: {0}")]
    Config(String),

    /// A malformed HTTP/1.1 request line or header block.
    #[error("malformed request: {0}")]
    Parse(String),

    /// The request line or header block exceeded the configured limits.
    #[error("request too large: {0}")]
    TooLarge(String),

    /// A `send` event arrived out of the order the response state machine
    /// allows (e.g. a body before a start, or an unrecognized event type).
    #[error("protocol sequencing violation: {0}")]
    Sequencing(String),

    /// The application raised/returned an error while handling a scope.
    #[error("application error: {0}")]
    Application(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Lifespan startup failed; the supervisor must not bind.
    #[error("lifespan startup failed: {0}")]
    LifespanStartup(String),

    /// The underlying transport (socket) failed.
    #[error("transport error: {0}")]
    Io(#[source] std::io::Error),

    /// A WebSocket handshake was attempted but the request did not carry the
    /// required upgrade headers, or carried an unsupported version.
    #[error("websocket handshake error: {0}")]
    WebSocketHandshake(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl Error {
    pub(crate) fn application_msg(msg: impl Into<String>) -> Self {
        Error::Application(Box::new(MessageError(msg.into())))
    }
}

#[derive(Debug)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MessageError {}
