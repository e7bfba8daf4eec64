//! A minimal sample [`RoundConfig`] shared across crate test suites.

use std::time::Duration;

use privcount_types::counter::{Counter, CounterShape, CounterTable, EventSubscription};
use privcount_types::round::{NoisePolicy, RoundConfig, RoundId, Thresholds, Timing};

/// One scalar counter ("E") and the distinguished validity counter
/// ("Validity.Z"), a quorum of one DC and one SK, and second-scale
/// timings so tests run fast.
pub fn sample_round_config() -> RoundConfig {
    RoundConfig {
        round_id: RoundId(1),
        start_after: None,
        counters: CounterTable {
            counters: vec![
                scalar_counter("E", 1.0),
                scalar_counter("Validity.Z", 0.0),
            ],
        },
        thresholds: Thresholds {
            dc_threshold: 1,
            sk_threshold: 1,
        },
        timing: Timing {
            collect_period: Duration::from_millis(200),
            checkin_period: Duration::from_millis(100),
            event_period: Duration::from_millis(100),
            delay_period: Duration::from_millis(100),
            start_timeout: Duration::from_secs(5),
            submission_timeout: Duration::from_secs(5),
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
        prime_modulus_hex: "f".repeat(130),
    }
}

fn scalar_counter(name: &str, sensitivity: f64) -> Counter {
    Counter {
        name: name.to_string(),
        shape: CounterShape::Scalar,
        subscription: EventSubscription {
            event_types: vec![],
            predicate: None,
            bin_field: None,
            increment_field: None,
            cap: None,
            entity_field: None,
        },
        sensitivity,
        expected_value: 0.0,
        sigma: None,
    }
}
