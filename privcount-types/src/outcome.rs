//! The outcome file schema.
//!
//! Written once per successfully completed round by the Tally Server.
//! Top-level keys are `tally` (per-counter reconstructed bin totals and
//! their differential-privacy parameters) and `context` (round timings,
//! participants, and software/protocol versions).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::round::{ConfigHash, RoundId};

/// One reconstructed bin of a counter's histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinResult {
    /// Lower edge, mirroring [`crate::counter::Edge`] but JSON-friendly
    /// (`-inf`/`+inf` literal strings, as in the counter table).
    pub lo: String,
    /// Upper edge.
    pub hi: String,
    /// The reconstructed, noise-corrected count.
    pub count: i128,
}

/// One counter's full result: its bins plus the differential-privacy
/// parameters used to produce them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterResult {
    /// Reconstructed bin totals, in declaration order.
    pub bins: Vec<BinResult>,
    /// Standard deviation of the noise mechanism applied.
    pub sigma: f64,
    /// The counter's configured sensitivity.
    pub sensitivity: f64,
    /// The per-counter epsilon allocation.
    pub epsilon: f64,
    /// The round-wide delta.
    pub delta: f64,
}

/// Round-level metadata accompanying the tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// The round identifier.
    pub round_id: RoundId,
    /// Content hash of the distributed round configuration.
    pub round_config_hash: ConfigHash,
    /// Wall-clock time the round entered `STARTING`, RFC 3339.
    pub start_time: String,
    /// Wall-clock time the round entered `STOPPING`, RFC 3339.
    pub stop_time: String,
    /// Wall-clock time the outcome was published, RFC 3339.
    pub publish_time: String,
    /// Fingerprints of Data Collectors whose shares contributed.
    pub participating_dcs: Vec<Fingerprint>,
    /// Fingerprints of Share Keepers whose shares contributed.
    pub participating_sks: Vec<Fingerprint>,
    /// The protocol version used for this round.
    pub protocol_version: u32,
    /// The Tally Server's software version.
    pub software_version: String,
    /// Which party sampled the round's noise. Always `"tally-server"`:
    /// the Tally Server samples noise once, at the moment it enters the
    /// tallying phase.
    pub noise_sampled_by: String,
    /// `true` if any validity ("zero") counter reconstructed to a
    /// non-zero value, flagging the outcome as suspect.
    pub validity_flagged: bool,
}

/// The full outcome file written by the Tally Server at the end of a
/// published round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Per-counter results, keyed by counter name.
    pub tally: BTreeMap<String, CounterResult>,
    /// Round-level metadata.
    pub context: Context,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips_through_json() {
        let outcome = Outcome {
            tally: BTreeMap::from([(
                "E".to_string(),
                CounterResult {
                    bins: vec![BinResult {
                        lo: "-inf".into(),
                        hi: "+inf".into(),
                        count: 5,
                    }],
                    sigma: 0.0,
                    sensitivity: 1.0,
                    epsilon: 1.0,
                    delta: 1e-6,
                },
            )]),
            context: Context {
                round_id: RoundId(1),
                round_config_hash: crate::round::RoundConfig {
                    round_id: RoundId(1),
                    start_after: None,
                    counters: Default::default(),
                    thresholds: crate::round::Thresholds {
                        dc_threshold: 1,
                        sk_threshold: 1,
                    },
                    timing: crate::round::Timing {
                        collect_period: std::time::Duration::from_secs(1),
                        checkin_period: std::time::Duration::from_secs(1),
                        event_period: std::time::Duration::from_secs(1),
                        delay_period: std::time::Duration::from_secs(1),
                        start_timeout: std::time::Duration::from_secs(1),
                        submission_timeout: std::time::Duration::from_secs(1),
                    },
                    noise: crate::round::NoisePolicy {
                        epsilon: 1.0,
                        delta: 1e-6,
                        sigma_decrease_tolerance: 0.0,
                        always_delay: false,
                    },
                    share_keepers: vec![],
                    event_subscription: vec![],
                    circuit_sample_rate: 1.0,
                    max_cell_events_per_circuit: 0,
                    rotate_period: std::time::Duration::from_secs(1),
                    continue_count: None,
                    prime_modulus_hex: "f".repeat(128),
                }
                .content_hash(),
                start_time: "2026-08-01T00:00:00Z".into(),
                stop_time: "2026-08-01T00:01:00Z".into(),
                publish_time: "2026-08-01T00:01:05Z".into(),
                participating_dcs: vec![],
                participating_sks: vec![],
                protocol_version: crate::PROTOCOL_VERSION,
                software_version: "0.1.0".into(),
                noise_sampled_by: "tally-server".into(),
                validity_flagged: false,
            },
        };
        let json = serde_json::to_string(&outcome).unwrap();
        let back: Outcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tally["E"].bins[0].count, 5);
    }
}
