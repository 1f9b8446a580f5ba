//! The `Accept` trait (spec §4.6): abstracts over however a listening socket
//! is represented behind the one method the Supervisor's accept loop drives.
//! TLS termination (when `Config::tls` is set) happens a layer up, wrapping
//! the stream this trait hands back rather than changing what implements it.
//!
//! Grounded on the teacher's `src/server/accept.rs`, collapsed from a
//! `Future`-polling trait into a native async-fn trait: this core is written
//! directly against async/await throughout, with no futures-0.1
//! compatibility layer to preserve, so `poll_accept` buys nothing an
//! `async fn` doesn't already give for free.

use std::net::SocketAddr;

use crate::common::io::Io;
use crate::error::Result;

/// Something that produces a stream of inbound connections.
pub(crate) trait Accept {
    type Conn: Io + 'static;

    /// Accept the next connection, or fail permanently (the accept loop
    /// treats an `Err` here as fatal — transient per-connection failures are
    /// the caller's concern, not this trait's).
    async fn accept(&self) -> Result<(Self::Conn, SocketAddr)>;
}

impl Accept for super::tcp::AddrIncoming {
    type Conn = tokio::net::TcpStream;

    async fn accept(&self) -> Result<(Self::Conn, SocketAddr)> {
        super::tcp::AddrIncoming::accept(self)
            .await
            .map_err(crate::error::Error::Io)
    }
}
