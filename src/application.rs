//! The application contract: `app(scope, receive, send)` (spec §2).
//!
//! Grounded on the teacher's `src/service/util.rs` `service_fn` — the same
//! "wrap a bare async fn as a trait object" shape, specialized from hyper's
//! generic `Service<Request> -> Future<Response>` down to this crate's one
//! concrete three-argument calling convention.

use std::future::Future;
use std::pin::Pin;

use crate::conn::{Receiver, Responder};
use crate::scope::Scope;

/// An application: the single callable a [`crate::server::Supervisor`]
/// drives once per scope (lifespan, http, websocket, or sse).
///
/// `'static` because a supervisor holds one `Arc<dyn Application>` (or a
/// concrete generic type, see [`crate::lifespan::wrap`]) for its entire
/// run; `Send + Sync` because scopes are handled on the executor's worker
/// threads, one task per connection.
pub trait Application: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        scope: Scope,
        receive: Receiver,
        send: Responder,
    ) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send + 'a>>;
}

/// Adapt a bare async function into an [`Application`], the same way the
/// teacher's `service_fn` adapts a bare async function into a `Service`.
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: Fn(Scope, Receiver, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    ServiceFn { f }
}

pub struct ServiceFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for ServiceFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFn").finish()
    }
}

impl<F, Fut> Application for ServiceFn<F>
where
    F: Fn(Scope, Receiver, Responder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    fn call<'a>(
        &'a self,
        scope: Scope,
        receive: Receiver,
        send: Responder,
    ) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send + 'a>> {
        Box::pin((self.f)(scope, receive, send))
    }
}

impl<A: Application + ?Sized> Application for std::sync::Arc<A> {
    fn call<'a>(
        &'a self,
        scope: Scope,
        receive: Receiver,
        send: Responder,
    ) -> Pin<Box<dyn Future<Output = crate::Result<()>> + Send + 'a>> {
        (**self).call(scope, receive, send)
    }
}
