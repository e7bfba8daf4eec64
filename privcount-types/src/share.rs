//! Share and seed types.
//!
//! A [`Share`] is one party's additive contribution to a single
//! `(counter, bin)` pair, held modulo the fixed prime `P`. A [`Seed`] is
//! the 256-bit secret exchanged between a DC/SK pair that both sides
//! expand into a cancelling keystream. Secret state purposefully does not
//! implement `Debug`/`Display`/`Clone` beyond what is required to move it
//! across an await point, mirroring how secret-shaped values are handled
//! elsewhere in this ecosystem.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Width, in bytes, of a share value's wire representation. Sized to
/// comfortably hold any modulus up to 2^512.
pub const SHARE_BYTES: usize = 64;

/// Width, in bytes, of a share seed: a 256-bit uniformly random value.
pub const SEED_BYTES: usize = 32;

/// A single party's additive share of a counter/bin total, modulo `P`.
///
/// Serializes as a big-endian hex string. Does not implement `Debug` to
/// avoid accidentally logging share values; use [`Share::describe`] for a
/// redacted label.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
#[serde(transparent)]
pub struct ShareValue(#[serde(with = "hex_bytes")] [u8; SHARE_BYTES]);

impl ShareValue {
    /// Wraps raw big-endian bytes.
    pub fn from_be_bytes(bytes: [u8; SHARE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Returns the big-endian byte representation.
    pub fn to_be_bytes(self) -> [u8; SHARE_BYTES] {
        self.0
    }
}

impl fmt::Debug for ShareValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShareValue(<redacted>)")
    }
}

/// One entry of a [`ShareMap`]: the share value for a specific
/// `(counter, bin)` pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct Share {
    /// Declaring counter name.
    pub counter: String,
    /// Bin index within that counter.
    pub bin_index: u64,
    /// The share value, modulo `P`.
    pub value: ShareValue,
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("counter", &self.counter)
            .field("bin_index", &self.bin_index)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// The full set of shares a DC or SK holds at round end, ready for
/// submission.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ShareMap {
    entries: BTreeMap<(String, u64), ShareValue>,
}

impl ShareMap {
    /// Creates an empty share map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the share for `(counter, bin_index)`.
    pub fn set(&mut self, counter: &str, bin_index: u64, value: ShareValue) {
        self.entries.insert((counter.to_string(), bin_index), value);
    }

    /// Looks up the share for `(counter, bin_index)`.
    pub fn get(&self, counter: &str, bin_index: u64) -> Option<ShareValue> {
        self.entries.get(&(counter.to_string(), bin_index)).copied()
    }

    /// Iterates over all `((counter, bin_index), value)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (&(String, u64), &ShareValue)> {
        self.entries.iter()
    }

    /// Number of `(counter, bin)` entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if this share map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ShareMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareMap({} entries, redacted)", self.entries.len())
    }
}

/// Identifies one DC/SK seed-exchange pairing within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeedId {
    /// Fingerprint of the Data Collector side of the pairing.
    pub dc: crate::fingerprint::Fingerprint,
    /// Fingerprint of the Share Keeper side of the pairing.
    pub sk: crate::fingerprint::Fingerprint,
}

/// A 256-bit share seed, shared pairwise between a DC and an SK.
///
/// Exists only from exchange to round end, then is wiped.
/// Deliberately does not implement `Debug`, `Display`, or `Serialize`
/// directly; use [`Seed::reveal`] only at the point of RSA-OAEP wrapping.
#[derive(ZeroizeOnDrop)]
pub struct Seed([u8; SEED_BYTES]);

impl Seed {
    /// Wraps raw seed bytes.
    pub fn from_bytes(bytes: [u8; SEED_BYTES]) -> Self {
        Self(bytes)
    }

    /// Exposes the raw seed bytes. Callers must not log or persist the
    /// result; it exists to feed RSA-OAEP wrapping and PRF expansion.
    pub fn reveal(&self) -> &[u8; SEED_BYTES] {
        &self.0
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex_decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("wrong byte length"))
    }

    fn hex_encode(bytes: &[u8]) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(out, "{b:02x}");
        }
        out
    }

    fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
        if s.len() % 2 != 0 {
            return Err("odd-length hex string".to_string());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
            .collect()
    }
}
