//! Binding and running a [`crate::Application`] as a standalone process
//! (spec §4.6).

pub(crate) mod accept;
pub(crate) mod builder;
pub(crate) mod inherited;
pub(crate) mod tcp;
#[cfg(feature = "tls")]
pub(crate) mod tls;

pub use builder::Config;
#[cfg(feature = "tls")]
pub use tls::TlsConfig;
