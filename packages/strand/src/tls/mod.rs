//! TLS support: rustls client configuration from PEM material and the
//! per-connection [`TlsSession`] sub-state-machines.

mod session;

pub use session::{ShutdownStatus, TlsReadOutcome, TlsSession, TlsStatus};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

use crate::config::TlsConfig;
use crate::error::{Error, Result};

/// Build a rustls client configuration from the connection's TLS material.
///
/// Trust anchors come from `ca_path` when set, otherwise the platform
/// store, falling back to the bundled webpki roots when the platform store
/// yields nothing. Failures here surface as `ConnectFailure::TlsContext`
/// on the Connect event.
pub fn client_config(tls: &TlsConfig) -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = RootCertStore::empty();
    match &tls.ca_path {
        Some(ca_path) => {
            for cert in load_certs(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::TlsContext(format!("bad CA certificate: {e}")))?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs();
            for cert in native.certs {
                // Individual unparsable platform certs are skipped, not fatal.
                let _ = roots.add(cert);
            }
            if roots.is_empty() {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }
    }
    if roots.is_empty() {
        return Err(Error::TlsContext("empty trust store".into()));
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let config = match (&tls.cert_path, &tls.key_path) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| Error::TlsContext(format!("certificate/key mismatch: {e}")))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(Error::TlsContext(
                "cert_path and key_path must be set together".into(),
            ));
        }
    };
    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::TlsContext(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let certs: std::io::Result<Vec<_>> = rustls_pemfile::certs(&mut reader).collect();
    let certs = certs
        .map_err(|e| Error::TlsContext(format!("bad PEM in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::TlsContext(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::TlsContext(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::TlsContext(format!("bad key PEM in {}: {e}", path.display())))?
        .ok_or_else(|| Error::TlsContext(format!("no private key in {}", path.display())))
}
