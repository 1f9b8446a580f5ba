//! The [`Scope`] data model — a per-interaction, immutable-after-construction
//! record describing the connection context (spec §3, "Scope").

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde_json::Value;

/// An ordered `[name, value]` header pair, as raw bytes.
///
/// Headers are kept as an ordered sequence rather than a name-bucketed map so
/// that multi-valued headers (e.g. repeated `Set-Cookie`) preserve their exact
/// wire order, even when interleaved with other header names. Names are
/// always lowercased ASCII by the time they reach a `Scope`.
pub type HeaderPair = (Bytes, Bytes);

/// An ordered sequence of header pairs.
pub type Headers = Vec<HeaderPair>;

/// Look up the first value for a (lowercase) header name.
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a Bytes> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name.as_bytes()))
        .map(|(_, v)| v)
}

/// The shared mapping established during lifespan startup and referenced
/// identically by every subsequent scope produced by the same server
/// instance (spec §3, "Shared State").
///
/// Keys are unique strings; values are type-erased so that application code
/// can store arbitrary `Send + Sync` values, in the spirit of
/// `http::Extensions`. Mutation outside of lifespan startup is permitted but
/// unsynchronized beyond the `RwLock` itself — concurrent *readers* never
/// block each other, and the core does not attempt to serialize writers
/// against request handling.
#[derive(Default)]
pub struct SharedState {
    inner: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl SharedState {
    /// Create a new, empty shared state (called once per server instance,
    /// before lifespan startup runs).
    pub fn new() -> Arc<Self> {
        Arc::new(SharedState {
            inner: RwLock::new(HashMap::new()),
        })
    }

    /// Insert a value under `key`, replacing any previous value.
    pub fn insert<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.inner
            .write()
            .expect("shared state lock poisoned")
            .insert(key.into(), Arc::new(value));
    }

    /// Fetch a previously inserted value by key and type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let guard = self.inner.read().expect("shared state lock poisoned");
        guard.get(key)?.clone().downcast::<T>().ok()
    }

    /// True if `state` points at the very same underlying mapping as `self`.
    pub fn is_same(self: &Arc<Self>, other: &Arc<Self>) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.read().expect("shared state lock poisoned");
        f.debug_struct("SharedState")
            .field("keys", &guard.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A `[host, port]` socket endpoint, as carried in `client`/`server` scope
/// attributes.
pub type Endpoint = (String, u16);

pub(crate) fn endpoint_from_addr(addr: SocketAddr) -> Endpoint {
    (addr.ip().to_string(), addr.port())
}

/// The scheme under which a scope was accepted (`http`/`https`/`ws`/`wss`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Attributes shared by `http`, `websocket`, and `sse` scopes.
#[derive(Debug)]
pub struct HttpLikeAttrs {
    pub path: String,
    pub raw_path: Bytes,
    pub query_string: Bytes,
    pub http_version: &'static str,
    pub scheme: Scheme,
    pub headers: Headers,
    pub client: Endpoint,
    pub server: Endpoint,
    pub root_path: String,
    pub state: Arc<SharedState>,
    pub extensions: HashMap<String, Value>,
}

/// The per-interaction context object handed to an application (spec §3,
/// "Scope"). Immutable after construction; the lifespan wrapper is the one
/// place that patches `state` in before delegating (spec §4.5).
#[derive(Debug)]
pub enum Scope {
    /// The pseudo-scope representing the server process lifecycle.
    Lifespan { state: Arc<SharedState> },
    /// An HTTP request/response interaction.
    Http {
        method: String,
        attrs: HttpLikeAttrs,
    },
    /// A WebSocket interaction, prior to or after the `websocket.accept`.
    WebSocket {
        subprotocols: Vec<String>,
        attrs: HttpLikeAttrs,
    },
    /// A server-sent-events interaction.
    Sse { attrs: HttpLikeAttrs },
}

impl Scope {
    /// The shared state reference carried by this scope, regardless of type.
    pub fn state(&self) -> &Arc<SharedState> {
        match self {
            Scope::Lifespan { state } => state,
            Scope::Http { attrs, .. } | Scope::WebSocket { attrs, .. } | Scope::Sse { attrs } => {
                &attrs.state
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Scope::Lifespan { .. } => "lifespan",
            Scope::Http { .. } => "http",
            Scope::WebSocket { .. } => "websocket",
            Scope::Sse { .. } => "sse",
        }
    }
}
