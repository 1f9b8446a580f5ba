//! TLS-terminated listener support (spec §4.6, `tls` configuration option),
//! gated behind the crate's `tls` feature.
//!
//! Grounded on `examples/Field-of-Dreams-Studio-hotaru/hotaru_core/Cargo.toml`'s
//! `rustls`/`tokio-rustls`/`rustls-pemfile` stack (see `DESIGN.md`).

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::rustls::server::AllowAnyAuthenticatedClient;
use tokio_rustls::rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};

/// Certificate/key material for a TLS-bound listener. When set on
/// [`super::Config`], the scope's `scheme` becomes `https` and a `tls`
/// extension is advertised.
pub struct TlsConfig {
    pub(crate) cert: PathBuf,
    pub(crate) key: PathBuf,
    pub(crate) ca: Option<PathBuf>,
    pub(crate) verify_client: bool,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("verify_client", &self.verify_client)
            .finish()
    }
}

impl TlsConfig {
    /// Terminate TLS using a PEM certificate chain and a PKCS#8 private key.
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        TlsConfig {
            cert: cert.into(),
            key: key.into(),
            ca: None,
            verify_client: false,
        }
    }

    /// Require and verify a client certificate signed by `ca`.
    pub fn with_client_ca(mut self, ca: impl Into<PathBuf>) -> Self {
        self.ca = Some(ca.into());
        self.verify_client = true;
        self
    }

    pub(crate) fn build_acceptor(&self) -> Result<TlsAcceptor> {
        let cert_chain = load_certs(&self.cert)?;
        let key = load_key(&self.key)?;
        let builder = ServerConfig::builder().with_safe_defaults();

        let server_config = match &self.ca {
            Some(ca_path) => {
                let roots = load_root_store(ca_path)?;
                let verifier = AllowAnyAuthenticatedClient::new(roots);
                builder
                    .with_client_cert_verifier(Arc::new(verifier))
                    .with_single_cert(cert_chain, key)
            }
            None => builder.with_no_client_auth().with_single_cert(cert_chain, key),
        }
        .map_err(|e| Error::Config(format!("invalid TLS certificate/key pair: {e}")))?;

        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Config(format!("failed to open TLS certificate {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    let raw = certs(&mut reader)
        .map_err(|e| Error::Config(format!("failed to parse TLS certificate {path:?}: {e}")))?;
    Ok(raw.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Config(format!("failed to open TLS private key {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    let mut keys = pkcs8_private_keys(&mut reader)
        .map_err(|e| Error::Config(format!("failed to parse TLS private key {path:?}: {e}")))?;
    if keys.is_empty() {
        return Err(Error::Config(format!(
            "no PKCS#8 private key found in {path:?}"
        )));
    }
    Ok(PrivateKey(keys.remove(0)))
}

fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(path)? {
        store
            .add(&cert)
            .map_err(|e| Error::Config(format!("invalid client CA certificate {path:?}: {e}")))?;
    }
    Ok(store)
}
