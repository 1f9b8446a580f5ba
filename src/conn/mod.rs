//! The Connection State Machine (spec §4): the per-TCP-connection
//! orchestrator. Owns the socket, drives the HTTP/1.1 parse loop, builds the
//! [`Scope`] for the interaction the request turned out to be, constructs
//! the matched [`Receiver`]/[`Responder`] capability pair, and runs the
//! application to completion.
//!
//! Grounded on the teacher's `src/proto/h1/dispatch.rs` (the same
//! read-parse-build-run shape), collapsed from the teacher's generic
//! `Service<Request>`/`Conn` split into one concrete function, since this
//! core has exactly one application calling convention rather than an
//! arbitrary user `Service`.

pub(crate) mod receive;
pub(crate) mod send;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub use receive::Receiver;
pub use send::Responder;

use receive::ReadSide;
use send::WriteSide;

use crate::application::Application;
use crate::body::take_body;
use crate::common::io::{BoxedIo, BufferedIo, Io, PrefixedIo};
use crate::error::{Error, OnError, Result};
use crate::event::ReceiveEvent;
use crate::http1::encode::serialize_response_start;
use crate::http1::{parse_request, ParseOutcome};
use crate::scope::{endpoint_from_addr, header_value, Headers, HttpLikeAttrs, Scope, SharedState};
use crate::ws;

/// Requests with a declared body larger than this are rejected with
/// `413 Payload Too Large` rather than buffered without bound (chunked
/// request bodies are not implemented — spec §9, Open Questions).
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Everything about a single accepted connection that doesn't depend on what
/// the request inside it turns out to be.
pub(crate) struct Connection<T> {
    io: T,
    peer: SocketAddr,
    local: SocketAddr,
    is_tls: bool,
    state: Arc<SharedState>,
    extensions: HashMap<String, Value>,
    access_log: bool,
    on_error: Option<OnError>,
}

impl<T: Io + 'static> Connection<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        io: T,
        peer: SocketAddr,
        local: SocketAddr,
        is_tls: bool,
        state: Arc<SharedState>,
        extensions: HashMap<String, Value>,
        access_log: bool,
        on_error: Option<OnError>,
    ) -> Self {
        Connection {
            io,
            peer,
            local,
            is_tls,
            state,
            extensions,
            access_log,
            on_error,
        }
    }

    /// Parse one request, build its scope, and run `app` to completion.
    /// Returns once the interaction is fully done — this core does not
    /// support keep-alive, so the caller closes the socket afterward.
    pub(crate) async fn serve<A: Application>(self, app: Arc<A>) -> Result<()> {
        let Connection {
            io,
            peer,
            local,
            is_tls,
            state,
            extensions,
            access_log,
            on_error,
        } = self;

        let boxed: BoxedIo = Box::new(io);
        let mut buffered = BufferedIo::new(boxed);

        let request = loop {
            match parse_request(&buffered.read_buf) {
                Ok(ParseOutcome::Complete { request, consumed }) => {
                    crate::http1::parse::advance(&mut buffered.read_buf, consumed);
                    break request;
                }
                Ok(ParseOutcome::Incomplete) => {
                    let n = buffered.read_more().await?;
                    if n == 0 {
                        // Peer closed before a full request arrived; nothing
                        // to respond to.
                        return Ok(());
                    }
                }
                Err(err) => {
                    let status = if matches!(err, Error::TooLarge(_)) { 431 } else { 400 };
                    let start = serialize_response_start(status, &Vec::new(), false);
                    buffered.queue_write(&start);
                    let _ = buffered.flush().await;
                    return Err(err);
                }
            }
        };

        let content_length = request.content_length.unwrap_or(0) as usize;
        if content_length > MAX_BODY_BYTES {
            let start = serialize_response_start(413, &Vec::new(), false);
            buffered.queue_write(&start);
            let _ = buffered.flush().await;
            return Err(Error::TooLarge(format!(
                "declared content-length {content_length} exceeds {MAX_BODY_BYTES}"
            )));
        }
        while buffered.read_buf.len() < content_length {
            if buffered.read_more().await? == 0 {
                return Err(Error::Parse(
                    "connection closed before the declared request body arrived".into(),
                ));
            }
        }
        let body = take_body(&mut buffered.read_buf, content_length);

        let is_ws = ws::is_upgrade_request(&request.headers);
        let scheme = crate::http1::parse::scheme_for(is_tls);

        let attrs = HttpLikeAttrs {
            path: request.path.clone(),
            raw_path: request.raw_path.clone(),
            query_string: request.query_string.clone(),
            http_version: request.http_version,
            scheme,
            headers: request.headers.clone(),
            client: endpoint_from_addr(peer),
            server: endpoint_from_addr(local),
            root_path: String::new(),
            state,
            extensions,
        };

        let started = Arc::new(AtomicBool::new(false));
        let (io, leftover) = buffered.into_parts();
        // Bytes already read past the request (and its declared body) belong
        // to whatever the peer sends next — pipelined WebSocket frames
        // arriving in the same read as the handshake, most commonly.
        let io: BoxedIo = if leftover.is_empty() {
            io
        } else {
            Box::new(PrefixedIo::new(leftover, io))
        };

        if is_ws {
            run_websocket(io, peer, &request.headers, attrs, app, started, access_log, on_error).await
        } else {
            run_http(io, peer, request.method, attrs, body, app, started, access_log, on_error).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_http<A: Application>(
    io: BoxedIo,
    peer: SocketAddr,
    method: String,
    attrs: HttpLikeAttrs,
    body: Bytes,
    app: Arc<A>,
    started: Arc<AtomicBool>,
    access_log: bool,
    on_error: Option<OnError>,
) -> Result<()> {
    let (read_half, write_half) = tokio::io::split(io);
    let write_half = Arc::new(Mutex::new(write_half));
    let is_sse = Arc::new(AtomicBool::new(false));
    let status = Arc::new(AtomicU16::new(0));

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let _ = tx.send(ReceiveEvent::HttpRequest { body, more: false });
    drop(tx);

    let receiver = Receiver::new(
        rx,
        ReadSide::Plain {
            read_half,
            is_sse: is_sse.clone(),
        },
    );
    let responder = Responder::new(
        WriteSide::Plain(write_half.clone()),
        started.clone(),
        is_sse,
        status.clone(),
    );

    let log_method = method.clone();
    let log_path = attrs.path.clone();
    let started_at = access_log.then(Instant::now);

    let scope = Scope::Http { method, attrs };
    let result = call_scope(app, scope, receiver, responder).await;

    if let Err(err) = &result {
        tracing::error!(error = %err, %peer, "application error handling http scope");
        if let Some(cb) = &on_error {
            cb(err);
        }
    }
    if !started.load(Ordering::Relaxed) {
        write_fallback_error(&write_half, 500).await;
        status.store(500, Ordering::Relaxed);
    }
    log_access(access_log, started_at, &peer, &log_method, &log_path, status.load(Ordering::Relaxed));
    result
}

#[allow(clippy::too_many_arguments)]
async fn run_websocket<A: Application>(
    io: BoxedIo,
    peer: SocketAddr,
    request_headers: &Headers,
    attrs: HttpLikeAttrs,
    app: Arc<A>,
    started: Arc<AtomicBool>,
    access_log: bool,
    on_error: Option<OnError>,
) -> Result<()> {
    let log_path = attrs.path.clone();
    let started_at = access_log.then(Instant::now);

    let key = match header_value(request_headers, "sec-websocket-key") {
        Some(k) => k.clone(),
        None => {
            let mut io = io;
            let _ = io
                .write_all(&serialize_response_start(400, &Vec::new(), false))
                .await;
            log_access(access_log, started_at, &peer, "websocket", &log_path, 400);
            return Err(Error::WebSocketHandshake("missing Sec-WebSocket-Key".into()));
        }
    };
    let subprotocols = ws::requested_subprotocols(request_headers);
    let accept = ws::accept_key(&key);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let _ = tx.send(ReceiveEvent::WebSocketConnect);
    drop(tx);

    // The 101 response is not written here — it's deferred until the
    // application actually sends `websocket.accept` (see
    // `Responder::accept_websocket`), so a negotiated subprotocol can be
    // included and `websocket.close` can still reject the upgrade before any
    // bytes go out.
    let (stream_tx, stream_rx) = tokio::sync::oneshot::channel();
    let status = Arc::new(AtomicU16::new(0));
    let receiver = Receiver::new(rx, ReadSide::PendingWebSocket { handoff: stream_rx });
    let responder = Responder::new(
        WriteSide::PendingWebSocket {
            io: Some(io),
            accept_key: Some(accept),
            handoff: Some(stream_tx),
        },
        started.clone(),
        Arc::new(AtomicBool::new(false)),
        status.clone(),
    );

    let scope = Scope::WebSocket { subprotocols, attrs };
    let result = call_scope(app, scope, receiver, responder).await;
    if let Err(err) = &result {
        tracing::error!(error = %err, %peer, "application error handling websocket scope");
        if let Some(cb) = &on_error {
            cb(err);
        }
    }
    log_access(access_log, started_at, &peer, "websocket", &log_path, status.load(Ordering::Relaxed));
    result
}

/// Run one scope to completion on its own task, so a panic inside the
/// application surfaces as a `JoinError` rather than unwinding the
/// connection task before `started`'s fallback-500 check runs (spec §7,
/// kind 1: "a panic caught via `tokio::spawn`'s `JoinError` path").
async fn call_scope<A: Application>(
    app: Arc<A>,
    scope: Scope,
    receive: Receiver,
    send: Responder,
) -> Result<()> {
    match tokio::spawn(async move { app.call(scope, receive, send).await }).await {
        Ok(result) => result,
        Err(join_err) => Err(Error::application_msg(format!(
            "application panicked: {join_err}"
        ))),
    }
}

/// Emit one `tracing` event per completed interaction when the Supervisor's
/// `Config::access_log` option is set, matching the teacher's
/// `tracing`-gated per-request logging idiom rather than a bespoke log
/// format.
fn log_access(
    enabled: bool,
    started_at: Option<Instant>,
    peer: &SocketAddr,
    method: &str,
    path: &str,
    status: u16,
) {
    if !enabled {
        return;
    }
    let elapsed_ms = started_at.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0);
    tracing::info!(%peer, method, path, status, elapsed_ms, "access");
}

/// Synthesize a minimal error response when the application future resolved
/// without ever sending `http.response.start` (spec §7, kind 1: "the
/// connection responds with a generic 500 and logs the error").
async fn write_fallback_error(write_half: &Arc<Mutex<tokio::io::WriteHalf<BoxedIo>>>, status: u16) {
    let body = reason_for(status);
    let headers: Headers = vec![(
        Bytes::from_static(b"content-length"),
        Bytes::from(body.len().to_string()),
    )];
    let start = serialize_response_start(status, &headers, false);
    let mut guard = write_half.lock().await;
    let _ = guard.write_all(&start).await;
    let _ = guard.write_all(body.as_bytes()).await;
    let _ = guard.flush().await;
    let _ = guard.shutdown().await;
}

fn reason_for(status: u16) -> &'static str {
    match status {
        500 => "Internal Server Error",
        _ => "Error",
    }
}
