//! Peer identity.
//!
//! Fingerprints identify long-lived RSA key pairs: a [`Fingerprint`]
//! is the SHA-256 digest of a peer's public key in canonical DER encoding.
//! They are used both in allow-lists (TS configuration) and in every
//! protocol message and outcome file to record who participated.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digest of a peer's RSA public key (canonical DER encoding).
///
/// Serializes as a lowercase hex string so fingerprints read naturally in
/// configuration files and outcome JSON.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint of a DER-encoded public key.
    pub fn of_der(der: &[u8]) -> Self {
        let digest = Sha256::digest(der);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Wraps a raw 32-byte digest.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses a lowercase or uppercase hex-encoded fingerprint, the same
    /// form [`Fingerprint::to_string`] produces. Used to load allow-list
    /// entries from configuration.
    pub fn from_hex(hex: &str) -> Result<Self, FingerprintError> {
        let bytes = hex::decode(hex).map_err(|_| FingerprintError::InvalidHex(hex.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FingerprintError::InvalidHex(hex.to_string()))?;
        Ok(Self(bytes))
    }
}

/// Errors parsing a [`Fingerprint`] from its configuration encoding.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// The supplied string was not 64 hex characters.
    #[error("invalid fingerprint hex: {0}")]
    InvalidHex(String),
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// The kind of peer on the other end of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    /// The Tally Server, the sole coordinator of a round.
    TallyServer,
    /// A Share Keeper, holding blinding shares.
    ShareKeeper,
    /// A Data Collector, observing events and maintaining counters.
    DataCollector,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerKind::TallyServer => "tally-server",
            PeerKind::ShareKeeper => "share-keeper",
            PeerKind::DataCollector => "data-collector",
        };
        f.write_str(name)
    }
}

/// An allow-list entry for one configured peer, or the wildcard `"*"` used
/// for weight testing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FingerprintPattern {
    /// Accept any peer of the matching kind.
    Any,
    /// Accept only the named fingerprint.
    Exact(Fingerprint),
}

impl FingerprintPattern {
    /// Returns `true` if `fp` is allowed by this pattern.
    pub fn matches(&self, fp: Fingerprint) -> bool {
        match self {
            FingerprintPattern::Any => true,
            FingerprintPattern::Exact(allowed) => *allowed == fp,
        }
    }

    /// Parses one allow-list entry from a configuration string: `"*"` for
    /// [`FingerprintPattern::Any`], otherwise a hex-encoded fingerprint.
    pub fn parse(s: &str) -> Result<Self, FingerprintError> {
        if s == "*" {
            Ok(FingerprintPattern::Any)
        } else {
            Fingerprint::from_hex(s).map(FingerprintPattern::Exact)
        }
    }
}
