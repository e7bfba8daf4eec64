//! Fake long-lived RSA identities for peers in a test round.
//!
//! Mirrors how a real Tally Server, Share Keeper, or Data Collector
//! loads its identity: a PKCS#8 PEM private key on disk, fingerprinted
//! by hashing the DER-encoded public key.

use std::path::Path;

use privcount_types::fingerprint::Fingerprint;
use rand::{CryptoRng, RngCore};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

/// Key size used for test identities. Small enough to generate quickly,
/// large enough that RSA-OAEP with SHA-256 padding still fits a 32-byte
/// seed or AES key.
const TEST_KEY_BITS: usize = 2048;

/// A generated RSA key pair plus the fingerprint peers would compute
/// for it.
pub struct TestIdentity {
    /// The identity's private key, as loaded from a peer's configured
    /// key file in production.
    pub private_key: RsaPrivateKey,
    /// The corresponding public key.
    pub public_key: RsaPublicKey,
    /// The fingerprint every peer would compute for this identity.
    pub fingerprint: Fingerprint,
}

impl TestIdentity {
    /// Generates a fresh test identity.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let private_key =
            RsaPrivateKey::new(rng, TEST_KEY_BITS).expect("RSA key generation must not fail");
        let public_key = RsaPublicKey::from(&private_key);
        let der = public_key
            .to_public_key_der()
            .expect("public key must encode to DER");
        let fingerprint = Fingerprint::of_der(der.as_bytes());
        Self {
            private_key,
            public_key,
            fingerprint,
        }
    }

    /// Writes the private key as a PKCS#8 PEM file at `path`, the format
    /// every role's `rsa_private_key_path` configuration field expects.
    pub fn write_private_key_pem(&self, path: &Path) {
        self.private_key
            .write_pkcs8_pem_file(path, LineEnding::LF)
            .expect("writing a test RSA key to a temp file must not fail");
    }
}
