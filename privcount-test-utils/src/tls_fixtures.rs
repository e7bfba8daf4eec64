//! A self-signed test CA plus one server and one client leaf
//! certificate, for exercising mutual-TLS connections in tests without
//! reaching outside the process.

use std::path::{Path, PathBuf};

use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use tempfile::TempDir;

/// PEM-encoded materials for a mutually-authenticated TLS test pair: one
/// CA, one server leaf, and one client leaf, all signed by that CA.
pub struct TestTls {
    ca_cert_pem: String,
    server_cert_pem: String,
    server_key_pem: String,
    client_cert_pem: String,
    client_key_pem: String,
}

impl TestTls {
    /// Generates a fresh CA and a server/client leaf pair signed by it.
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().expect("key generation must not fail");
        let mut ca_params =
            CertificateParams::new(Vec::<String>::new()).expect("empty SAN list is valid");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .expect("self-signing the test CA must not fail");

        let server_key = KeyPair::generate().expect("key generation must not fail");
        let server_params = CertificateParams::new(vec!["localhost".to_string()])
            .expect("SAN list is valid");
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .expect("signing the test server leaf must not fail");

        let client_key = KeyPair::generate().expect("key generation must not fail");
        let client_params = CertificateParams::new(vec!["localhost".to_string()])
            .expect("SAN list is valid");
        let client_cert = client_params
            .signed_by(&client_key, &ca_cert, &ca_key)
            .expect("signing the test client leaf must not fail");

        Self {
            ca_cert_pem: ca_cert.pem(),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
            client_cert_pem: client_cert.pem(),
            client_key_pem: client_key.serialize_pem(),
        }
    }

    /// Writes every PEM file into a fresh temp directory and returns it
    /// alongside the paths `privcount-proto::tls` expects.
    pub fn materialize(&self) -> MaterializedTestTls {
        let dir = TempDir::new().expect("creating a temp dir must not fail");
        let ca_path = dir.path().join("ca.pem");
        let server_cert_path = dir.path().join("server.pem");
        let server_key_path = dir.path().join("server-key.pem");
        let client_cert_path = dir.path().join("client.pem");
        let client_key_path = dir.path().join("client-key.pem");

        std::fs::write(&ca_path, &self.ca_cert_pem).expect("writing ca cert must not fail");
        std::fs::write(&server_cert_path, &self.server_cert_pem)
            .expect("writing server cert must not fail");
        std::fs::write(&server_key_path, &self.server_key_pem)
            .expect("writing server key must not fail");
        std::fs::write(&client_cert_path, &self.client_cert_pem)
            .expect("writing client cert must not fail");
        std::fs::write(&client_key_path, &self.client_key_pem)
            .expect("writing client key must not fail");

        MaterializedTestTls {
            _dir: dir,
            ca_path,
            server_cert_path,
            server_key_path,
            client_cert_path,
            client_key_path,
        }
    }
}

/// The on-disk form of a [`TestTls`] pair. The backing temp directory is
/// removed when this value is dropped, so keep it alive for as long as
/// the paths are in use.
pub struct MaterializedTestTls {
    _dir: TempDir,
    /// Path to the trusted CA certificate PEM.
    pub ca_path: PathBuf,
    /// Path to the server leaf certificate PEM.
    pub server_cert_path: PathBuf,
    /// Path to the server leaf private key PEM.
    pub server_key_path: PathBuf,
    /// Path to the client leaf certificate PEM.
    pub client_cert_path: PathBuf,
    /// Path to the client leaf private key PEM.
    pub client_key_path: PathBuf,
}

impl MaterializedTestTls {
    /// The temp directory backing these paths.
    pub fn dir(&self) -> &Path {
        self._dir.path()
    }
}
