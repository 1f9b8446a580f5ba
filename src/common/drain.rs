//! Graceful-shutdown signalling for the Server Supervisor.
//!
//! Grounded on the teacher's `src/common/drain.rs` (same signal/watch shape:
//! one `Signal` the supervisor holds, one cloneable `Watch` per connection
//! task), rewritten on top of `tokio::sync::watch` instead of the futures
//! 0.1 `oneshot` + `Shared` + draining `mpsc` combination the teacher used
//! before tokio's own primitives existed.

use tokio::sync::watch;

/// Create a linked `(Signal, Watch)` pair. The supervisor keeps the
/// `Signal`; every spawned connection task clones the `Watch`.
pub(crate) fn channel() -> (Signal, Watch) {
    let (tx, rx) = watch::channel(false);
    (Signal { tx }, Watch { rx })
}

pub(crate) struct Signal {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub(crate) struct Watch {
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// Tell every outstanding `Watch` that the server is shutting down.
    /// Connections already in flight are not forcibly cancelled; they
    /// observe this via [`Watch::shutting_down`] at their next suspension
    /// point.
    pub(crate) fn drain(self) {
        let _ = self.tx.send(true);
    }
}

impl Watch {
    /// Resolves once [`Signal::drain`] has been called.
    pub(crate) async fn shutting_down(&mut self) {
        let _ = self.rx.wait_for(|v| *v).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_wakes_watchers() {
        let (signal, mut watch) = channel();
        let handle = tokio::spawn(async move {
            watch.shutting_down().await;
        });
        signal.drain();
        handle.await.unwrap();
    }
}
