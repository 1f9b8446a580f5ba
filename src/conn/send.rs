//! The `send` capability handed to an application (spec §4.3), and the
//! response-state machine that enforces the ordering rules of spec §7.1
//! ("start before body", "body before trailers", "no second start").
//!
//! A sequencing violation does not poison the connection (spec §7, kind 3):
//! the offending event is dropped, [`Responder::send`] returns
//! [`crate::Error::Sequencing`], and the application may keep calling `send`
//! with well-formed events afterward.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::common::io::BoxedIo;
use crate::error::{Error, Result};
use crate::event::{SendEvent, WsMessage};
use crate::http1::encode::{serialize_response_start, Encoder};
use crate::scope::Headers;

/// Which wire format a [`Responder`] is currently rendering the response as.
enum Mode {
    /// No `http.response.start`/`sse.start`/`websocket.accept` observed yet.
    NotStarted,
    Http { encoder: Encoder, trailers_pending: bool },
    Sse,
}

/// The writable half of the connection a [`Responder`] renders events onto.
///
/// `Plain` is wrapped in a `Mutex` (rather than handed to the `Responder` by
/// unique ownership) so that [`super::Connection::serve`] can keep a second
/// handle to it — once the application future resolves, the connection still
/// needs write access to synthesize a `500` if no response ever started
/// (spec §7, kind 1), by which point this `Responder` has been dropped.
pub(crate) enum WriteSide {
    Plain(Arc<Mutex<WriteHalf<BoxedIo>>>),
    WebSocket(futures_util::stream::SplitSink<WebSocketStream<BoxedIo>, Message>),
    /// A websocket scope whose handshake has been validated (the key is
    /// checked, a `Sec-WebSocket-Accept` value computed) but not yet written
    /// to the wire. The 101 response is deferred until the application
    /// actually sends `websocket.accept` — only then can a negotiated
    /// subprotocol or extra headers be included, and only then is it too
    /// late for `websocket.close` to reject the upgrade instead (spec §3:
    /// "a WebSocket scope's first send must be either `websocket.accept` or
    /// `websocket.close`").
    PendingWebSocket {
        io: Option<BoxedIo>,
        accept_key: Option<String>,
        handoff: Option<oneshot::Sender<futures_util::stream::SplitStream<WebSocketStream<BoxedIo>>>>,
    },
    /// `lifespan` scopes: there is no transport to render onto. The four
    /// lifespan bookkeeping events are instead forwarded down this channel so
    /// whoever is driving the lifespan exchange (the Supervisor) can observe
    /// startup/shutdown completion without waiting on `Application::call`
    /// itself to resolve, since `run_lifespan` only resolves at shutdown.
    None(tokio::sync::mpsc::UnboundedSender<SendEvent>),
}

/// The `send` capability (spec §4.3).
pub struct Responder {
    write: WriteSide,
    mode: Mode,
    /// Shared with the owning [`super::Connection`]; see [`WriteSide::Plain`].
    started: Arc<AtomicBool>,
    /// Shared with this scope's [`super::receive::Receiver`] so a later
    /// disconnect is reported as `sse.disconnect` rather than
    /// `http.disconnect` once the application has switched into SSE mode.
    is_sse: Arc<AtomicBool>,
    /// Shared with the owning [`super::Connection`] so the access log (when
    /// enabled) can report the status code this scope actually sent, without
    /// the Connection needing to inspect the response wire format itself.
    status: Arc<AtomicU16>,
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder").finish()
    }
}

impl Responder {
    pub(crate) fn new(
        write: WriteSide,
        started: Arc<AtomicBool>,
        is_sse: Arc<AtomicBool>,
        status: Arc<AtomicU16>,
    ) -> Self {
        Responder {
            write,
            mode: Mode::NotStarted,
            started,
            is_sse,
            status,
        }
    }

    /// Validate and serialize one `send` event, per the scope's event
    /// vocabulary (spec §3, §4.4, §5, §6).
    pub async fn send(&mut self, event: SendEvent) -> Result<()> {
        match event {
            SendEvent::HttpResponseStart { status, headers, trailers } => {
                self.start_http(status, headers, trailers).await
            }
            SendEvent::HttpResponseBody { body, more } => self.body_http(&body, more).await,
            SendEvent::HttpResponseTrailers { headers } => self.trailers_http(&headers).await,
            SendEvent::SseStart { status, headers } => self.start_sse(status, headers).await,
            SendEvent::SseSend { data, event, id, retry } => {
                self.send_sse(crate::sse::render_event(&data, event.as_deref(), id.as_deref(), retry))
                    .await
            }
            SendEvent::SseComment { comment } => {
                self.send_sse(crate::sse::render_comment(&comment)).await
            }
            SendEvent::SseClose => self.close_sse().await,
            SendEvent::WebSocketAccept { subprotocol, headers } => {
                self.accept_websocket(subprotocol, headers).await
            }
            SendEvent::WebSocketSend { message } => self.send_websocket(message).await,
            SendEvent::WebSocketClose { code, reason } => self.close_websocket(code, reason).await,
            // Lifespan events have no wire representation; forward them to
            // whoever is watching `WriteSide::None`'s channel, if anyone is
            // (spec §4.5).
            lifespan @ (SendEvent::LifespanStartupComplete
            | SendEvent::LifespanStartupFailed { .. }
            | SendEvent::LifespanShutdownComplete
            | SendEvent::LifespanShutdownFailed { .. }) => {
                if let WriteSide::None(tx) = &self.write {
                    let _ = tx.send(lifespan);
                }
                Ok(())
            }
        }
    }

    fn plain(&self) -> Result<Arc<Mutex<WriteHalf<BoxedIo>>>> {
        match &self.write {
            WriteSide::Plain(w) => Ok(w.clone()),
            WriteSide::WebSocket(_) | WriteSide::PendingWebSocket { .. } => Err(Error::Sequencing(
                "an HTTP/SSE event was sent on a websocket scope".into(),
            )),
            WriteSide::None(_) => Err(Error::Sequencing(
                "an HTTP/SSE event was sent on a lifespan scope".into(),
            )),
        }
    }

    async fn write_plain(&self, bytes: &[u8]) -> Result<()> {
        let write = self.plain()?;
        let mut guard = write.lock().await;
        guard.write_all(bytes).await?;
        Ok(())
    }

    async fn flush_plain(&self) -> Result<()> {
        let write = self.plain()?;
        let mut guard = write.lock().await;
        guard.flush().await?;
        Ok(())
    }

    async fn start_http(&mut self, status: u16, headers: Headers, trailers: bool) -> Result<()> {
        if !matches!(self.mode, Mode::NotStarted) {
            return Err(Error::Sequencing(
                "http.response.start sent more than once".into(),
            ));
        }
        let chunked = trailers || crate::scope::header_value(&headers, "content-length").is_none();
        let encoder = if chunked { Encoder::Chunked } else { Encoder::Length };
        let bytes = serialize_response_start(status, &headers, chunked);
        self.write_plain(&bytes).await?;
        self.started.store(true, Ordering::Relaxed);
        self.status.store(status, Ordering::Relaxed);
        self.mode = Mode::Http {
            encoder,
            trailers_pending: trailers,
        };
        Ok(())
    }

    async fn body_http(&mut self, body: &[u8], more: bool) -> Result<()> {
        let (encoder, trailers_pending) = match self.mode {
            Mode::Http { encoder, trailers_pending } => (encoder, trailers_pending),
            _ => return Err(Error::Sequencing("http.response.body sent before start".into())),
        };
        let framed = encoder.encode_body(body);
        self.write_plain(&framed).await?;
        if !more && !trailers_pending {
            let end = encoder.encode_end();
            if !end.is_empty() {
                self.write_plain(&end).await?;
            }
        }
        self.flush_plain().await
    }

    async fn trailers_http(&mut self, headers: &Headers) -> Result<()> {
        let encoder = match self.mode {
            Mode::Http { encoder, trailers_pending: true } => encoder,
            Mode::Http { trailers_pending: false, .. } => {
                return Err(Error::Sequencing(
                    "http.response.trailers sent but trailers=false on start".into(),
                ))
            }
            _ => return Err(Error::Sequencing("http.response.trailers sent before start".into())),
        };
        let framed = encoder.encode_trailers(headers);
        self.write_plain(&framed).await?;
        self.flush_plain().await?;
        self.mode = Mode::Http {
            encoder,
            trailers_pending: false,
        };
        Ok(())
    }

    async fn start_sse(&mut self, status: u16, mut headers: Headers) -> Result<()> {
        if !matches!(self.mode, Mode::NotStarted) {
            return Err(Error::Sequencing("sse.start sent more than once".into()));
        }
        if crate::scope::header_value(&headers, "content-type").is_none() {
            headers.push((
                bytes::Bytes::from_static(b"content-type"),
                bytes::Bytes::from_static(b"text/event-stream"),
            ));
        }
        let bytes = serialize_response_start(status, &headers, false);
        self.write_plain(&bytes).await?;
        self.flush_plain().await?;
        self.started.store(true, Ordering::Relaxed);
        self.status.store(status, Ordering::Relaxed);
        self.is_sse.store(true, Ordering::Relaxed);
        self.mode = Mode::Sse;
        Ok(())
    }

    async fn send_sse(&mut self, rendered: String) -> Result<()> {
        if !matches!(self.mode, Mode::Sse) {
            return Err(Error::Sequencing("sse.send/sse.comment sent before sse.start".into()));
        }
        self.write_plain(rendered.as_bytes()).await?;
        self.flush_plain().await
    }

    async fn close_sse(&mut self) -> Result<()> {
        if !matches!(self.mode, Mode::Sse) {
            return Err(Error::Sequencing("sse.close sent before sse.start".into()));
        }
        let write = self.plain()?;
        let mut guard = write.lock().await;
        guard.shutdown().await?;
        Ok(())
    }

    /// Write the deferred 101 response, honoring a negotiated subprotocol and
    /// any extra headers the application asked for, then hand the read half
    /// of the resulting `WebSocketStream` over to this scope's `Receiver`.
    async fn accept_websocket(&mut self, subprotocol: Option<String>, mut headers: Headers) -> Result<()> {
        let (mut io, accept_key, handoff) = match &mut self.write {
            WriteSide::PendingWebSocket { io, accept_key, handoff } => {
                let io = io
                    .take()
                    .ok_or_else(|| Error::Sequencing("websocket.accept sent more than once".into()))?;
                let accept_key = accept_key.take().unwrap_or_default();
                let handoff = handoff
                    .take()
                    .ok_or_else(|| Error::Sequencing("websocket.accept sent more than once".into()))?;
                (io, accept_key, handoff)
            }
            WriteSide::WebSocket(_) => {
                return Err(Error::Sequencing("websocket.accept sent more than once".into()))
            }
            WriteSide::Plain(_) | WriteSide::None(_) => {
                return Err(Error::Sequencing("websocket.accept sent on a non-websocket scope".into()))
            }
        };

        let mut response_headers: Headers = vec![
            (bytes::Bytes::from_static(b"upgrade"), bytes::Bytes::from_static(b"websocket")),
            (bytes::Bytes::from_static(b"connection"), bytes::Bytes::from_static(b"Upgrade")),
            (bytes::Bytes::from_static(b"sec-websocket-accept"), bytes::Bytes::from(accept_key)),
        ];
        if let Some(proto) = subprotocol {
            response_headers.push((bytes::Bytes::from_static(b"sec-websocket-protocol"), bytes::Bytes::from(proto)));
        }
        response_headers.append(&mut headers);

        let start = serialize_response_start(101, &response_headers, false);
        io.write_all(&start).await?;
        io.flush().await?;
        self.started.store(true, Ordering::Relaxed);
        self.status.store(101, Ordering::Relaxed);

        let ws_stream = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
        let (sink, stream) = ws_stream.split();
        // The `Receiver` on the other side of this scope may already have
        // dropped its handoff half if the application never calls
        // `receive()` again; a failed send here just means nothing is left
        // to read further frames.
        let _ = handoff.send(stream);
        self.write = WriteSide::WebSocket(sink);
        Ok(())
    }

    async fn send_websocket(&mut self, message: WsMessage) -> Result<()> {
        let sink = match &mut self.write {
            WriteSide::WebSocket(sink) => sink,
            WriteSide::PendingWebSocket { .. } => {
                return Err(Error::Sequencing("websocket.send sent before websocket.accept".into()))
            }
            WriteSide::Plain(_) | WriteSide::None(_) => {
                return Err(Error::Sequencing("websocket.send sent on a non-websocket scope".into()))
            }
        };
        let msg = match message {
            WsMessage::Text(t) => Message::Text(t),
            WsMessage::Bytes(b) => Message::Binary(b.to_vec()),
        };
        sink.send(msg)
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
    }

    /// Either close an already-accepted websocket (a real close frame), or,
    /// if sent before `websocket.accept`, reject the upgrade outright: no 101
    /// is ever written and no `WebSocketStream` is ever constructed.
    async fn close_websocket(&mut self, code: u16, reason: Option<String>) -> Result<()> {
        match &mut self.write {
            WriteSide::WebSocket(sink) => {
                let frame = CloseFrame {
                    code: code.into(),
                    reason: reason.unwrap_or_default().into(),
                };
                sink.send(Message::Close(Some(frame)))
                    .await
                    .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
                sink.close()
                    .await
                    .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
            }
            WriteSide::PendingWebSocket { io, .. } => {
                let mut io = io
                    .take()
                    .ok_or_else(|| Error::Sequencing("websocket.close sent more than once".into()))?;
                let body = reason.unwrap_or_default();
                let headers: Headers = vec![(
                    bytes::Bytes::from_static(b"content-length"),
                    bytes::Bytes::from(body.len().to_string()),
                )];
                let status = 403;
                let start = serialize_response_start(status, &headers, false);
                io.write_all(&start).await?;
                io.write_all(body.as_bytes()).await?;
                io.flush().await?;
                io.shutdown().await?;
                self.started.store(true, Ordering::Relaxed);
                self.status.store(status, Ordering::Relaxed);
                Ok(())
            }
            WriteSide::Plain(_) | WriteSide::None(_) => {
                Err(Error::Sequencing("websocket.close sent on a non-websocket scope".into()))
            }
        }
    }
}
