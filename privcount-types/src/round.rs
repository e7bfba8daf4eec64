//! Round configuration: the immutable parameter set that drives
//! one collection round, identified by a content hash carried in every
//! subsequent protocol message.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::counter::CounterTable;
use crate::fingerprint::FingerprintPattern;

/// Monotonically increasing identifier for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round-{}", self.0)
    }
}

/// The content hash of a [`RoundConfig`], computed over its canonical JSON
/// serialization. Every protocol message after `RoundConfig` carries this
/// hash so stale or mismatched messages are detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigHash([u8; 32]);

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Quorum and timing thresholds governing when a round may proceed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum number of Data Collectors that must confirm before
    /// counting may begin.
    pub dc_threshold: usize,
    /// Minimum number of Share Keepers that must confirm before counting
    /// may begin.
    pub sk_threshold: usize,
}

/// Per-step timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timing {
    /// Duration of the counting window.
    #[serde(with = "humantime_serde")]
    pub collect_period: Duration,
    /// Interval at which DCs report liveness to the TS.
    #[serde(with = "humantime_serde")]
    pub checkin_period: Duration,
    /// Interval between event-source status reports.
    #[serde(with = "humantime_serde")]
    pub event_period: Duration,
    /// Minimum wall-clock gap enforced between rounds whose noise
    /// allocation has materially shrunk.
    #[serde(with = "humantime_serde")]
    pub delay_period: Duration,
    /// Deadline by which a round must have started.
    #[serde(with = "humantime_serde", default)]
    pub start_timeout: Duration,
    /// Deadline by which all expected shares must be submitted.
    #[serde(with = "humantime_serde", default)]
    pub submission_timeout: Duration,
}

/// Noise/delay policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoisePolicy {
    /// Target differential-privacy epsilon for the round, divided across
    /// counters.
    pub epsilon: f64,
    /// Target differential-privacy delta for the round.
    pub delta: f64,
    /// How much a sigma may shrink relative to the prior round before the
    /// delay policy engages.
    pub sigma_decrease_tolerance: f64,
    /// If set, always enforce `delay_period` regardless of whether sigma
    /// decreased.
    #[serde(default)]
    pub always_delay: bool,
}

/// Immutable round configuration.
///
/// Distributed byte-identical to every peer; [`RoundConfig::content_hash`]
/// is computed over the canonical JSON encoding and is what peers
/// acknowledge and what every later message references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundConfig {
    /// This round's identifier.
    pub round_id: RoundId,
    /// ISO-8601 UTC deadline after which the round should not start.
    #[serde(default)]
    pub start_after: Option<String>,
    /// The declarative counter table for this round.
    pub counters: CounterTable,
    /// Quorum thresholds.
    pub thresholds: Thresholds,
    /// Timing configuration.
    pub timing: Timing,
    /// Noise/delay policy.
    pub noise: NoisePolicy,
    /// Configured Share Keeper allow-list.
    pub share_keepers: Vec<FingerprintPattern>,
    /// Event types the Data Collector must be able to supply.
    pub event_subscription: Vec<String>,
    /// Probability that a newly observed circuit contributes
    ///.
    pub circuit_sample_rate: f64,
    /// Per-grouping-key cap on cell-level events.
    pub max_cell_events_per_circuit: u64,
    /// Entity rotation period.
    #[serde(with = "humantime_serde")]
    pub rotate_period: Duration,
    /// Whether the TS should schedule another round after this one ends.
    #[serde(default)]
    pub continue_count: Option<u64>,
    /// The fixed prime modulus `P` all peers must use.
    pub prime_modulus_hex: String,
}

impl RoundConfig {
    /// Computes the content hash of this configuration by hashing its
    /// canonical (field-order-stable) JSON serialization.
    ///
    /// # Panics
    /// Panics if the configuration cannot be serialized, which would
    /// indicate a bug in this crate's `Serialize` implementations.
    pub fn content_hash(&self) -> ConfigHash {
        let canonical =
            serde_json::to_vec(self).expect("RoundConfig must always be serializable");
        let digest = Sha256::digest(&canonical);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        ConfigHash(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> RoundConfig {
        RoundConfig {
            round_id: RoundId(1),
            start_after: None,
            counters: CounterTable::default(),
            thresholds: Thresholds {
                dc_threshold: 1,
                sk_threshold: 1,
            },
            timing: Timing {
                collect_period: Duration::from_secs(60),
                checkin_period: Duration::from_secs(10),
                event_period: Duration::from_secs(10),
                delay_period: Duration::from_secs(30),
                start_timeout: Duration::from_secs(30),
                submission_timeout: Duration::from_secs(30),
            },
            noise: NoisePolicy {
                epsilon: 1.0,
                delta: 1e-6,
                sigma_decrease_tolerance: 0.0,
                always_delay: false,
            },
            share_keepers: vec![],
            event_subscription: vec![],
            circuit_sample_rate: 1.0,
            max_cell_events_per_circuit: 0,
            rotate_period: Duration::from_secs(3600),
            continue_count: None,
            prime_modulus_hex: "f".repeat(128),
        }
    }

    #[test]
    fn content_hash_is_deterministic_round_trip() {
        let cfg = sample_config();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RoundConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.content_hash(), back.content_hash());
    }

    #[test]
    fn content_hash_changes_with_round_id() {
        let mut cfg = sample_config();
        let h1 = cfg.content_hash();
        cfg.round_id = RoundId(2);
        let h2 = cfg.content_hash();
        assert_ne!(h1, h2);
    }
}
