//! TLS configuration loading. Every peer dials every other peer over
//! plain mutual-TLS; certificate and key material is handed to us as
//! PEM files, and peer identity is established above this layer, by the
//! application-level handshake in [`crate::handshake`], not by
//! certificate verification.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::ProtoError;

/// Installs `ring` as the process-wide default `rustls` crypto provider.
///
/// Must be called once, before building any [`TlsAcceptor`] or
/// [`TlsConnector`]; rustls 0.23 panics on the first config build
/// otherwise. Safe to call more than once — later calls are ignored.
pub fn install_crypto_provider() {
    let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();
}

/// Loads a chain of PEM-encoded certificates from `path`.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProtoError> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProtoError::Tls(e.to_string()))
}

/// Loads a single PEM-encoded private key from `path`.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProtoError> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ProtoError::Tls(e.to_string()))?
        .ok_or_else(|| ProtoError::Tls("no private key found in file".to_string()))
}

/// Builds a [`TlsAcceptor`] that requires and verifies client
/// certificates signed by `trusted_ca`, using `cert`/`key` as this
/// peer's own identity.
pub fn build_acceptor(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    trusted_ca: Vec<CertificateDer<'static>>,
) -> Result<TlsAcceptor, ProtoError> {
    let mut roots = RootCertStore::empty();
    for ca in trusted_ca {
        roots
            .add(ca)
            .map_err(|e| ProtoError::Tls(e.to_string()))?;
    }
    let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ProtoError::Tls(e.to_string()))?;
    let config = ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| ProtoError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Builds a [`TlsConnector`] that presents `cert`/`key` as this peer's
/// client identity and verifies the server against `trusted_ca`.
pub fn build_connector(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    trusted_ca: Vec<CertificateDer<'static>>,
) -> Result<TlsConnector, ProtoError> {
    let mut roots = RootCertStore::empty();
    for ca in trusted_ca {
        roots
            .add(ca)
            .map_err(|e| ProtoError::Tls(e.to_string()))?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(cert_chain, private_key)
        .map_err(|e| ProtoError::Tls(e.to_string()))?;
    Ok(TlsConnector::from(Arc::new(config)))
}
