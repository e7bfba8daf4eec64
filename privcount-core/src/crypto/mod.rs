//! Cryptographic primitives for the peer protocol: RSA-OAEP seed
//! wrapping, AES-GCM share sealing, and the HMAC-SHA256 mutual
//! handshake.

pub mod aead;
pub mod handshake;
pub mod rsa_seed;

/// Errors shared across the cryptographic primitives in this module.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// RSA-OAEP encryption or decryption failed.
    #[error("RSA-OAEP operation failed: {0}")]
    Rsa(String),
    /// AES-GCM sealing or opening failed (including authentication
    /// failure on open).
    #[error("AES-GCM operation failed")]
    Aead,
    /// A key or nonce did not have the expected length.
    #[error("invalid key or nonce length: expected {expected}, got {actual}")]
    BadLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length supplied.
        actual: usize,
    },
    /// HMAC verification failed during the handshake.
    #[error("handshake proof verification failed")]
    HandshakeProof,
}
