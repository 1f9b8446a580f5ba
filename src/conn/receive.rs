//! The `receive` capability handed to an application (spec §4.3).
//!
//! Three behaviors, collapsed into one small state machine: a FIFO queue of
//! already-known events (the seed event, and anything the connection decided
//! ahead of time), a suspension point once the queue is empty, and a latch so
//! that once a disconnect-class event has been delivered, every subsequent
//! `receive` call returns the same event again instead of hanging forever
//! (spec §4.3, "Suspension points").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::common::io::BoxedIo;
use crate::event::{ReceiveEvent, WsMessage};

fn is_disconnect(ev: &ReceiveEvent) -> bool {
    matches!(
        ev,
        ReceiveEvent::HttpDisconnect
            | ReceiveEvent::WebSocketDisconnect { .. }
            | ReceiveEvent::SseDisconnect
    )
}

/// How a [`Receiver`] notices that the peer has gone away once its seed
/// event(s) have been drained.
pub(crate) enum ReadSide {
    /// `http`/`sse` scopes: a raw read is only ever used to detect EOF, since
    /// the peer has nothing further to say to this core once the request
    /// line and headers (and any buffered body) have been consumed.
    Plain {
        read_half: ReadHalf<BoxedIo>,
        is_sse: Arc<AtomicBool>,
    },
    /// `websocket` scopes: frames are decoded lazily, on demand, by
    /// `tokio-tungstenite`.
    WebSocket {
        stream: futures_util::stream::SplitStream<WebSocketStream<BoxedIo>>,
    },
    /// `websocket` scopes before `websocket.accept`/`websocket.close` has
    /// been sent: there is no frame stream yet, only the promise of one from
    /// `Responder::accept_websocket` once the application decides to
    /// proceed. If the sender is dropped without ever sending (the upgrade
    /// was rejected, or the scope call ended first), this read side reports
    /// a disconnect instead of hanging forever.
    PendingWebSocket {
        handoff: oneshot::Receiver<futures_util::stream::SplitStream<WebSocketStream<BoxedIo>>>,
    },
    /// `lifespan` scopes: there is no transport to watch. The supervisor
    /// queues exactly `lifespan.startup` then, later, `lifespan.shutdown`.
    None,
}

/// The `receive` capability (spec §4.3).
pub struct Receiver {
    queued: mpsc::UnboundedReceiver<ReceiveEvent>,
    read: ReadSide,
    latched: Option<ReceiveEvent>,
    /// Set once `queued` has been observed empty and closed. A closed,
    /// empty `mpsc::UnboundedReceiver::recv()` resolves immediately rather
    /// than pending, so leaving it in a `select!` after that point would
    /// fire that branch on almost every poll and starve the socket read.
    queue_closed: bool,
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver").field("latched", &self.latched).finish()
    }
}

impl Receiver {
    pub(crate) fn new(queued: mpsc::UnboundedReceiver<ReceiveEvent>, read: ReadSide) -> Self {
        Receiver {
            queued,
            read,
            latched: None,
            queue_closed: false,
        }
    }

    /// Await the next event for this scope. Once a disconnect-class event has
    /// been observed, every subsequent call returns it again rather than
    /// suspending.
    pub async fn receive(&mut self) -> ReceiveEvent {
        if let Some(ev) = &self.latched {
            return ev.clone();
        }

        if let Ok(ev) = self.queued.try_recv() {
            if is_disconnect(&ev) {
                self.latched = Some(ev.clone());
            }
            return ev;
        }

        let ev = self.wait_for_next().await;
        if is_disconnect(&ev) {
            self.latched = Some(ev.clone());
        }
        ev
    }

    async fn wait_for_next(&mut self) -> ReceiveEvent {
        loop {
            match &mut self.read {
                ReadSide::Plain { read_half, is_sse } => {
                    if self.queue_closed {
                        let mut probe = [0u8; 64];
                        return match read_half.read(&mut probe).await {
                            Ok(0) | Err(_) => disconnect_for(is_sse),
                            Ok(_) => continue,
                        };
                    }
                    let mut probe = [0u8; 64];
                    tokio::select! {
                        queued = self.queued.recv() => {
                            match queued {
                                Some(ev) => return ev,
                                None => {
                                    self.queue_closed = true;
                                    continue;
                                }
                            }
                        }
                        read = read_half.read(&mut probe) => {
                            match read {
                                Ok(0) | Err(_) => return disconnect_for(is_sse),
                                Ok(_) => continue,
                            }
                        }
                    }
                }
                ReadSide::WebSocket { stream } => {
                    if self.queue_closed {
                        return match stream.next().await {
                            Some(Ok(Message::Text(text))) => {
                                ReceiveEvent::WebSocketReceive { message: WsMessage::Text(text) }
                            }
                            Some(Ok(Message::Binary(data))) => ReceiveEvent::WebSocketReceive {
                                message: WsMessage::Bytes(Bytes::from(data)),
                            },
                            Some(Ok(Message::Close(frame))) => ReceiveEvent::WebSocketDisconnect {
                                code: frame.map(|f| f.code.into()).unwrap_or(1000),
                            },
                            Some(Ok(_)) => continue,
                            Some(Err(_)) | None => ReceiveEvent::WebSocketDisconnect { code: 1006 },
                        };
                    }
                    tokio::select! {
                        queued = self.queued.recv() => {
                            match queued {
                                Some(ev) => return ev,
                                None => {
                                    self.queue_closed = true;
                                    continue;
                                }
                            }
                        }
                        frame = stream.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    return ReceiveEvent::WebSocketReceive {
                                        message: WsMessage::Text(text),
                                    }
                                }
                                Some(Ok(Message::Binary(data))) => {
                                    return ReceiveEvent::WebSocketReceive {
                                        message: WsMessage::Bytes(Bytes::from(data)),
                                    }
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    return ReceiveEvent::WebSocketDisconnect {
                                        code: frame.map(|f| f.code.into()).unwrap_or(1000),
                                    }
                                }
                                Some(Ok(_)) => continue,
                                Some(Err(_)) | None => {
                                    return ReceiveEvent::WebSocketDisconnect { code: 1006 }
                                }
                            }
                        }
                    }
                }
                ReadSide::PendingWebSocket { handoff } => {
                    if self.queue_closed {
                        return match handoff.await {
                            Ok(stream) => {
                                self.read = ReadSide::WebSocket { stream };
                                continue;
                            }
                            Err(_) => ReceiveEvent::WebSocketDisconnect { code: 1006 },
                        };
                    }
                    tokio::select! {
                        queued = self.queued.recv() => {
                            match queued {
                                Some(ev) => return ev,
                                None => {
                                    self.queue_closed = true;
                                    continue;
                                }
                            }
                        }
                        received = handoff => {
                            match received {
                                Ok(stream) => {
                                    self.read = ReadSide::WebSocket { stream };
                                    continue;
                                }
                                Err(_) => return ReceiveEvent::WebSocketDisconnect { code: 1006 },
                            }
                        }
                    }
                }
                ReadSide::None => match self.queued.recv().await {
                    Some(ev) => return ev,
                    None => {
                        unreachable!("lifespan receive channel closed before lifespan.shutdown was queued")
                    }
                },
            }
        }
    }
}

fn disconnect_for(is_sse: &AtomicBool) -> ReceiveEvent {
    if is_sse.load(Ordering::Relaxed) {
        ReceiveEvent::SseDisconnect
    } else {
        ReceiveEvent::HttpDisconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    #[tokio::test]
    async fn plain_receive_does_not_disconnect_once_the_seed_queue_drains() {
        let (client, server) = duplex(64);
        let boxed: BoxedIo = Box::new(server);
        let (read_half, _write_half) = tokio::io::split(boxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ReceiveEvent::HttpRequest {
            body: Bytes::new(),
            more: false,
        });
        drop(tx);

        let mut receiver = Receiver::new(
            rx,
            ReadSide::Plain {
                read_half,
                is_sse: Arc::new(AtomicBool::new(false)),
            },
        );
        assert!(matches!(receiver.receive().await, ReceiveEvent::HttpRequest { .. }));

        // The seed channel has closed; the socket is still open, so a second
        // call must suspend rather than report a spurious disconnect.
        let second = timeout(Duration::from_millis(50), receiver.receive()).await;
        assert!(second.is_err(), "receive should suspend, not return a spurious disconnect");
        drop(client);
    }
}
