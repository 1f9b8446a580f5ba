//! The Lifespan Wrapper (spec §4.5): a higher-order combinator that attaches
//! startup/shutdown behavior to an application without the application
//! needing to understand the `lifespan` scope itself.
//!
//! Nesting `wrap` composes in a fixed order regardless of how many layers
//! are stacked: every previously-registered startup handler runs before a
//! newly-added one (child-first startup), and every newly-added shutdown
//! handler runs before a previously-registered one (parent-first shutdown).
//! This mirrors the teacher's `Service`-layering combinators (e.g.
//! `src/service/layer.rs`'s wrapping order for middleware), generalized from
//! "wrap a request handler" to "wrap a process lifecycle."

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::application::Application;
use crate::conn::{Receiver, Responder};
use crate::error::{Error, Result};
use crate::event::{ReceiveEvent, SendEvent};
use crate::scope::{Scope, SharedState};

/// A startup or shutdown handler: given the server's shared state, do
/// whatever setup/teardown is needed, or fail.
pub type LifespanHandler =
    Arc<dyn Fn(Arc<SharedState>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Types that carry an explicit list of startup/shutdown handlers, rather
/// than requiring [`wrap`] to guess at an arbitrary [`Application`]'s
/// lifespan behavior by inspecting it. [`Bare`] is the base case (no
/// handlers of its own); [`Wrapped`] accumulates one more layer on top.
pub trait HasLifespanHandlers: Application {
    fn startup_handlers(&self) -> Vec<LifespanHandler>;
    fn shutdown_handlers(&self) -> Vec<LifespanHandler>;
}

/// Adapt a plain [`Application`] into one with an (empty) set of lifespan
/// handlers, so it can be passed to [`wrap`].
pub fn bare<A: Application>(app: A) -> Bare<A> {
    Bare(app)
}

pub struct Bare<A>(A);

impl<A> std::fmt::Debug for Bare<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bare").finish()
    }
}

impl<A: Application> Application for Bare<A> {
    fn call<'a>(
        &'a self,
        scope: Scope,
        receive: Receiver,
        send: Responder,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.0.call(scope, receive, send)
    }
}

impl<A: Application> HasLifespanHandlers for Bare<A> {
    fn startup_handlers(&self) -> Vec<LifespanHandler> {
        Vec::new()
    }

    fn shutdown_handlers(&self) -> Vec<LifespanHandler> {
        Vec::new()
    }
}

/// An application with one more startup/shutdown layer attached on top of
/// `inner`'s own handlers.
pub struct Wrapped<A> {
    inner: A,
    startup: Vec<LifespanHandler>,
    shutdown: Vec<LifespanHandler>,
}

impl<A> std::fmt::Debug for Wrapped<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wrapped")
            .field("startup_handlers", &self.startup.len())
            .field("shutdown_handlers", &self.shutdown.len())
            .finish()
    }
}

/// Attach a startup and/or shutdown handler to `inner`. The `lifespan`
/// scope is intercepted entirely by the resulting [`Wrapped`] — `inner`
/// never sees it; every other scope type is passed straight through.
pub fn wrap<A: HasLifespanHandlers>(
    inner: A,
    startup: Option<LifespanHandler>,
    shutdown: Option<LifespanHandler>,
) -> Wrapped<A> {
    let mut startup_handlers = inner.startup_handlers();
    startup_handlers.extend(startup);

    let mut shutdown_handlers = Vec::new();
    shutdown_handlers.extend(shutdown);
    shutdown_handlers.extend(inner.shutdown_handlers());

    Wrapped {
        inner,
        startup: startup_handlers,
        shutdown: shutdown_handlers,
    }
}

impl<A: Application> Application for Wrapped<A> {
    fn call<'a>(
        &'a self,
        scope: Scope,
        mut receive: Receiver,
        mut send: Responder,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        match scope {
            Scope::Lifespan { state } => {
                let startup = self.startup.clone();
                let shutdown = self.shutdown.clone();
                Box::pin(async move { run_lifespan(state, startup, shutdown, &mut receive, &mut send).await })
            }
            other => self.inner.call(other, receive, send),
        }
    }
}

impl<A: Application> HasLifespanHandlers for Wrapped<A> {
    fn startup_handlers(&self) -> Vec<LifespanHandler> {
        self.startup.clone()
    }

    fn shutdown_handlers(&self) -> Vec<LifespanHandler> {
        self.shutdown.clone()
    }
}

async fn run_lifespan(
    state: Arc<SharedState>,
    startup: Vec<LifespanHandler>,
    shutdown: Vec<LifespanHandler>,
    receive: &mut Receiver,
    send: &mut Responder,
) -> Result<()> {
    loop {
        match receive.receive().await {
            ReceiveEvent::LifespanStartup => {
                let mut failure = None;
                for handler in &startup {
                    if let Err(e) = handler(state.clone()).await {
                        failure = Some(e.to_string());
                        break;
                    }
                }
                match failure {
                    None => send.send(SendEvent::LifespanStartupComplete).await?,
                    Some(message) => {
                        send.send(SendEvent::LifespanStartupFailed { message: message.clone() }).await?;
                        return Err(Error::LifespanStartup(message));
                    }
                }
            }
            ReceiveEvent::LifespanShutdown => {
                let mut failure = None;
                for handler in &shutdown {
                    if let Err(e) = handler(state.clone()).await {
                        failure.get_or_insert_with(|| e.to_string());
                    }
                }
                match failure {
                    None => send.send(SendEvent::LifespanShutdownComplete).await?,
                    Some(message) => send.send(SendEvent::LifespanShutdownFailed { message }).await?,
                }
                return Ok(());
            }
            other => {
                return Err(Error::Sequencing(format!(
                    "unexpected event on a lifespan scope: {other:?}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::service_fn;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    fn handler(
        log: Arc<StdMutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> LifespanHandler {
        Arc::new(move |_state| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(label);
                Ok(())
            })
        })
    }

    fn noop_app() -> impl Application {
        service_fn(|_scope, _receive, _send| async { Ok(()) })
    }

    #[test]
    fn startup_runs_child_before_parent_shutdown_runs_parent_before_child() {
        let log = Arc::new(StdMutex::new(Vec::new()));

        let inner = wrap(
            bare(noop_app()),
            Some(handler(log.clone(), "inner-startup")),
            Some(handler(log.clone(), "inner-shutdown")),
        );
        let outer = wrap(
            inner,
            Some(handler(log.clone(), "outer-startup")),
            Some(handler(log.clone(), "outer-shutdown")),
        );

        assert_eq!(outer.startup.len(), 2);
        assert_eq!(outer.shutdown.len(), 2);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            for handler in &outer.startup {
                handler(SharedState::new()).await.unwrap();
            }
            for handler in &outer.shutdown {
                handler(SharedState::new()).await.unwrap();
            }
        });

        let order = log.lock().unwrap().clone();
        assert_eq!(
            order,
            vec!["inner-startup", "outer-startup", "outer-shutdown", "inner-shutdown"]
        );
    }

    #[test]
    fn startup_failure_short_circuits_remaining_handlers() {
        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = ran.clone();
        let failing: LifespanHandler = Arc::new(move |_state| {
            Box::pin(async move { Err(Error::Config("boom".into())) })
        });
        let counting: LifespanHandler = Arc::new(move |_state| {
            let ran = ran_clone.clone();
            Box::pin(async move {
                ran.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        });

        // `failing` is registered on the inner (child) layer, so it runs
        // first; the outer layer's `counting` handler must never run.
        let app = wrap(bare(noop_app()), Some(failing), None);
        let app = wrap(app, Some(counting), None);

        assert_eq!(app.startup.len(), 2);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            for handler in &app.startup {
                if handler(SharedState::new()).await.is_err() {
                    break;
                }
            }
        });

        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }
}
