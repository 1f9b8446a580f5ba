//! The Server Supervisor (spec §4.6): binds a listener, drives the lifespan
//! scope for the life of the process, and spawns one task per accepted
//! connection.
//!
//! Grounded on the teacher's `Server`/`Builder` pair in `src/server/server.rs`
//! (bind/serve/with_graceful_shutdown shape), collapsed from a type
//! parameterized over an arbitrary `MakeServiceRef` into one concrete
//! `Application`, since this core has exactly one calling convention. Shutdown
//! wiring follows `src/common/drain.rs` as already adapted in
//! [`crate::common::drain`].

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::application::Application;
use crate::common::drain;
use crate::common::io::BoxedIo;
use crate::conn::{Connection, Receiver, Responder};
use crate::error::{Error, OnError, Result};
use crate::event::{ReceiveEvent, SendEvent};
use crate::scope::{Scope, SharedState};
use crate::server::accept::Accept;
use crate::server::inherited::{self, InheritedTarget, INHERIT_ENV_VAR};
use crate::server::tcp::AddrIncoming;
#[cfg(feature = "tls")]
use crate::server::tls::TlsConfig;

/// How the Supervisor's listening socket is obtained (spec §4.6).
enum Bind {
    /// Bind `host:port` directly.
    Direct(SocketAddr),
    /// Recover an already-open listening socket named in `GATEWAYRT_INHERIT`.
    Inherited,
}

/// Whichever acceptor the Supervisor ends up needing: plain TCP, or (with
/// the `tls` feature) a TLS-terminating wrapper around it.
enum Acceptor {
    Plain,
    #[cfg(feature = "tls")]
    Tls(tokio_rustls::TlsAcceptor),
}

impl Clone for Acceptor {
    fn clone(&self) -> Self {
        match self {
            Acceptor::Plain => Acceptor::Plain,
            #[cfg(feature = "tls")]
            Acceptor::Tls(a) => Acceptor::Tls(a.clone()),
        }
    }
}

/// Immutable configuration for a [`Supervisor`], built up with the `with_*`
/// methods below before calling [`Config::serve`].
pub struct Config {
    bind: Bind,
    extensions: HashMap<String, Value>,
    quiet: bool,
    access_log: bool,
    on_error: Option<OnError>,
    #[cfg(feature = "tls")]
    tls: Option<TlsConfig>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Config");
        s.field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field("quiet", &self.quiet)
            .field("access_log", &self.access_log)
            .field("on_error", &self.on_error.is_some());
        #[cfg(feature = "tls")]
        s.field("tls", &self.tls);
        s.finish()
    }
}

impl Config {
    /// Bind directly to `addr`.
    pub fn bind(addr: SocketAddr) -> Self {
        Config {
            bind: Bind::Direct(addr),
            extensions: HashMap::new(),
            quiet: false,
            access_log: false,
            on_error: None,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Recover the listening socket from `GATEWAYRT_INHERIT` instead of
    /// binding a new one (spec §4.6, "bind: inherited fd").
    pub fn inherited() -> Self {
        Config {
            bind: Bind::Inherited,
            extensions: HashMap::new(),
            quiet: false,
            access_log: false,
            on_error: None,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Attach an opaque per-server extension value, visible on every scope's
    /// `extensions` field.
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Suppress the per-connection `tracing` access log.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Terminate TLS on the bound listener using `tls`, advertising
    /// `scheme=https` and a `tls` extension to every scope (spec §4.6).
    #[cfg(feature = "tls")]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Emit one `tracing` event per completed interaction (spec §4.6,
    /// "`access_log`"), matching the teacher's `tracing`-gated request
    /// logging idiom.
    pub fn access_log(mut self) -> Self {
        self.access_log = true;
        self
    }

    /// Additionally invoke `callback` with any uncaught application error,
    /// alongside the standard `tracing::error!` log line (spec §4.6,
    /// "`on_error`").
    pub fn on_error(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Run `app` to completion: lifespan startup, the accept loop, and
    /// lifespan shutdown once `shutdown` resolves.
    pub async fn serve<A: Application>(self, app: A, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Config {
            bind,
            mut extensions,
            quiet,
            access_log,
            on_error,
            #[cfg(feature = "tls")]
            tls,
        } = self;

        let app = Arc::new(app);
        let state = SharedState::new();

        let lifespan = run_lifespan_startup(app.clone(), state.clone()).await?;

        let incoming = match bind {
            Bind::Direct(addr) => AddrIncoming::bind(addr).await?,
            Bind::Inherited => bind_from_environment().await?,
        };
        if !quiet {
            tracing::info!(local_addr = %incoming.local_addr(), "listening");
        }

        #[cfg(feature = "tls")]
        let acceptor = match &tls {
            Some(cfg) => {
                extensions.insert("tls".into(), Value::Bool(true));
                Acceptor::Tls(cfg.build_acceptor()?)
            }
            None => Acceptor::Plain,
        };
        #[cfg(not(feature = "tls"))]
        let acceptor = Acceptor::Plain;

        let (signal, watch) = drain::channel();
        let accept_result = accept_loop(
            &incoming,
            acceptor,
            app.clone(),
            state.clone(),
            extensions,
            access_log,
            on_error,
            watch,
            shutdown,
        )
        .await;
        signal.drain();

        let shutdown_result = run_lifespan_shutdown(lifespan).await;
        accept_result.and(shutdown_result)
    }
}

async fn bind_from_environment() -> Result<AddrIncoming> {
    let value = std::env::var(INHERIT_ENV_VAR)
        .map_err(|_| Error::Config(format!("{INHERIT_ENV_VAR} is not set")))?;
    let mut targets = inherited::parse(&value)?;
    if targets.is_empty() {
        return Err(Error::Config(format!("{INHERIT_ENV_VAR} named no sockets")));
    }
    // Multiple entries select the first; this core drives exactly one
    // listener per Supervisor.
    match targets.remove(0) {
        InheritedTarget::Tcp { fd, .. } => {
            let std_listener = inherited::tcp_listener_from_fd(fd);
            AddrIncoming::from_std(std_listener)
        }
        InheritedTarget::Unix { path, .. } => Err(Error::Config(format!(
            "{INHERIT_ENV_VAR} named a unix socket at {path:?}; this core only accepts TCP listeners"
        ))),
    }
}

/// Everything needed to later drive the same lifespan `Application::call`
/// future to its shutdown half.
enum LifespanHandle {
    Active {
        queue: mpsc::UnboundedSender<ReceiveEvent>,
        events: mpsc::UnboundedReceiver<SendEvent>,
        task: tokio::task::JoinHandle<Result<()>>,
    },
    /// The `Application` never acknowledged `lifespan.startup` because it
    /// doesn't implement the lifespan protocol at all (spec §8, scenario 1:
    /// an app that raises "Unsupported scope type: lifespan" still gets
    /// bound and serves HTTP normally). There is nothing left to drive at
    /// shutdown.
    Unsupported,
}

fn mentions_unsupported_scope(err: &Error) -> bool {
    err.to_string().to_lowercase().contains("unsupported scope")
}

/// Start the single long-lived `lifespan` scope call, send `lifespan.startup`
/// into it, and wait for the matching `lifespan.startup.complete` /
/// `lifespan.startup.failed` acknowledgement before returning (spec §4.5).
async fn run_lifespan_startup<A: Application>(
    app: Arc<A>,
    state: Arc<SharedState>,
) -> Result<LifespanHandle> {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    let receiver = Receiver::new(in_rx, crate::conn::receive::ReadSide::None);
    let responder = Responder::new(
        crate::conn::send::WriteSide::None(out_tx),
        Arc::new(std::sync::atomic::AtomicBool::new(false)),
        Arc::new(std::sync::atomic::AtomicBool::new(false)),
        Arc::new(std::sync::atomic::AtomicU16::new(0)),
    );

    let task = tokio::spawn(async move { app.call(Scope::Lifespan { state }, receiver, responder).await });

    let _ = in_tx.send(ReceiveEvent::LifespanStartup);

    match out_rx.recv().await {
        Some(SendEvent::LifespanStartupComplete) => Ok(LifespanHandle::Active {
            queue: in_tx,
            events: out_rx,
            task,
        }),
        Some(SendEvent::LifespanStartupFailed { message }) => {
            let _ = task.await;
            Err(Error::LifespanStartup(message))
        }
        // No ack arrived: either `send`'s sender half already closed because
        // the scope call resolved without ever touching it, or something
        // other than the two startup events showed up first. Either way,
        // fall back to the call's own result to decide whether this app
        // simply has no lifespan support or genuinely failed.
        _ => match task.await {
            Ok(Ok(())) => Ok(LifespanHandle::Unsupported),
            Ok(Err(err)) if mentions_unsupported_scope(&err) => Ok(LifespanHandle::Unsupported),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(Error::LifespanStartup(format!(
                "lifespan task panicked: {join_err}"
            ))),
        },
    }
}

async fn run_lifespan_shutdown(handle: LifespanHandle) -> Result<()> {
    let (queue, mut events, task) = match handle {
        LifespanHandle::Unsupported => return Ok(()),
        LifespanHandle::Active { queue, events, task } => (queue, events, task),
    };

    let _ = queue.send(ReceiveEvent::LifespanShutdown);
    drop(queue);

    let ack = events.recv().await;
    let result = task
        .await
        .map_err(|e| Error::Config(format!("lifespan task panicked: {e}")))?;

    match ack {
        Some(SendEvent::LifespanShutdownFailed { message }) => {
            tracing::error!(%message, "lifespan shutdown failed");
        }
        Some(SendEvent::LifespanShutdownComplete) | None => {}
        Some(other) => {
            tracing::warn!(event = other.kind(), "unexpected event while awaiting lifespan shutdown");
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop<A: Application>(
    incoming: &AddrIncoming,
    acceptor: Acceptor,
    app: Arc<A>,
    state: Arc<SharedState>,
    extensions: HashMap<String, Value>,
    access_log: bool,
    on_error: Option<OnError>,
    mut watch: drain::Watch,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let local = incoming.local_addr();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => return Ok(()),
            accepted = Accept::accept(incoming) => {
                let (stream, peer) = accepted?;
                let app = app.clone();
                let state = state.clone();
                let extensions = extensions.clone();
                let on_error = on_error.clone();
                let acceptor = acceptor.clone();
                let mut conn_watch = watch.clone();
                tokio::spawn(async move {
                    let (io, is_tls): (BoxedIo, bool) = match acceptor {
                        Acceptor::Plain => (Box::new(stream), false),
                        #[cfg(feature = "tls")]
                        Acceptor::Tls(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => (Box::new(tls_stream), true),
                            Err(err) => {
                                tracing::debug!(error = %err, %peer, "tls handshake failed");
                                return;
                            }
                        },
                    };
                    tokio::select! {
                        result = Connection::new(io, peer, local, is_tls, state, extensions, access_log, on_error).serve(app) => {
                            if let Err(err) = result {
                                tracing::debug!(error = %err, %peer, "connection ended with an error");
                            }
                        }
                        _ = conn_watch.shutting_down() => {}
                    }
                });
            }
        }
    }
}
