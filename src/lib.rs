#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]

//! # gatewayrt
//!
//! `gatewayrt` is an asynchronous application-gateway runtime: a small
//! contract (`Application::call(scope, receive, send)`) plus an HTTP/1.1,
//! WebSocket, and Server-Sent-Events connection core that drives it.
//!
//! An application is any type that implements [`Application`] — most
//! commonly built with [`service_fn`] from a bare async closure. The runtime
//! hands it one [`Scope`] per interaction (a server lifecycle, an HTTP
//! request, a WebSocket connection, or an SSE stream), along with a
//! [`Receiver`] to await further events and a [`Responder`] to emit a
//! response. The application owns the entire interaction for as long as its
//! future is alive; the core never second-guesses what it sends, beyond
//! enforcing the wire-ordering rules a well-formed response must follow.
//!
//! ## Low-level
//!
//! `gatewayrt` is a building block, not a framework: there is no router, no
//! middleware stack, no templating. [`crate::lifespan::wrap`] composes
//! startup/shutdown behavior around an application; everything else (routing
//! on path/method, request body parsing beyond raw bytes, content
//! negotiation) is left to the application or a higher-level crate built on
//! top of this one.
//!
//! ## Example
//!
//! ```no_run
//! use gatewayrt::{service_fn, Scope, SendEvent};
//!
//! # async fn run() -> gatewayrt::Result<()> {
//! let app = service_fn(|scope, mut receive, mut send| async move {
//!     if let Scope::Http { .. } = scope {
//!         let _ = receive.receive().await;
//!         send.send(SendEvent::HttpResponseStart {
//!             status: 200,
//!             headers: vec![("content-length".into(), "2".into())],
//!             trailers: false,
//!         })
//!         .await?;
//!         send.send(SendEvent::HttpResponseBody {
//!             body: "ok".into(),
//!             more: false,
//!         })
//!         .await?;
//!     }
//!     Ok(())
//! });
//!
//! gatewayrt::Config::bind("127.0.0.1:8080".parse().unwrap())
//!     .serve(app, std::future::pending())
//!     .await
//! # }
//! ```

pub mod application;
pub(crate) mod body;
pub(crate) mod common;
pub(crate) mod conn;
pub mod error;
pub mod event;
pub(crate) mod http1;
pub mod lifespan;
pub mod scope;
pub(crate) mod server;
pub(crate) mod sse;
pub(crate) mod ws;

pub use application::{service_fn, Application, ServiceFn};
pub use conn::{Receiver, Responder};
pub use error::{Error, Result};
pub use event::{ReceiveEvent, SendEvent, WsMessage};
pub use scope::{Endpoint, HeaderPair, Headers, HttpLikeAttrs, Scheme, Scope, SharedState};
pub use server::Config;
#[cfg(feature = "tls")]
pub use server::TlsConfig;
