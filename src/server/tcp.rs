//! Direct TCP binding (spec §4.6, "bind: direct").
//!
//! Grounded on the teacher's `src/server/tcp.rs` `AddrIncoming`, trimmed to
//! this core's actual needs: no keepalive/nodelay tuning knobs (this core
//! doesn't reuse connections, so neither setting has an observable effect —
//! noted in `DESIGN.md`), no `sleep_on_errors` backoff (accept-loop error
//! handling lives in [`super::accept`] instead).

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};

/// An already-bound listening socket, ready to accept connections.
pub(crate) struct AddrIncoming {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl AddrIncoming {
    pub(crate) async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;
        Self::from_listener(listener)
    }

    /// Adopt an already-bound `std::net::TcpListener`, e.g. one recovered
    /// from an inherited file descriptor (spec §4.6, "bind: inherited fd").
    pub(crate) fn from_std(listener: std::net::TcpListener) -> Result<Self> {
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::Config(format!("failed to set listener non-blocking: {e}")))?;
        let listener = TcpListener::from_std(listener)
            .map_err(|e| Error::Config(format!("failed to adopt inherited listener: {e}")))?;
        Self::from_listener(listener)
    }

    fn from_listener(listener: TcpListener) -> Result<Self> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Config(format!("failed to read local address: {e}")))?;
        Ok(AddrIncoming { listener, local_addr })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }
}
