//! Local acceptance policy applied to every offered round configuration,
//! independent of whatever the Tally Server itself enforces: a Share
//! Keeper that cannot verify an operator's own tolerance would have no
//! defense against a compromised or misconfigured coordinator silently
//! shrinking the privacy budget.

use std::collections::BTreeMap;

use privcount_core::noise;
use privcount_types::round::RoundConfig;

/// Tracks the sigma this Share Keeper last accepted for each counter, so
/// it can refuse a round whose sigma has shrunk too far, too fast.
#[derive(Debug, Default, Clone)]
pub struct LocalPolicy {
    tolerance: f64,
    last_sigma: BTreeMap<String, f64>,
}

impl LocalPolicy {
    /// Creates a policy enforcing `tolerance` (the maximum fractional
    /// sigma shrink accepted between rounds for the same counter).
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            last_sigma: BTreeMap::new(),
        }
    }

    /// Validates `config` against this process's configuration-table
    /// invariants and its own sigma history; returns the rejection
    /// reason, if any.
    pub fn evaluate(&self, config: &RoundConfig) -> Result<(), String> {
        config.counters.validate()?;
        for counter in &config.counters.counters {
            let Some(sigma) = counter.sigma else {
                continue;
            };
            let previous = self.last_sigma.get(&counter.name).copied();
            if noise::delay_required(previous, sigma, self.tolerance, false) {
                return Err(format!(
                    "counter {} sigma shrank below local tolerance",
                    counter.name
                ));
            }
        }
        Ok(())
    }

    /// Records the sigmas of an accepted round, for comparison against
    /// the next one.
    pub fn record(&mut self, config: &RoundConfig) {
        for counter in &config.counters.counters {
            if let Some(sigma) = counter.sigma {
                self.last_sigma.insert(counter.name.clone(), sigma);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privcount_types::counter::{Counter, CounterShape, CounterTable, EventSubscription};
    use privcount_types::round::{NoisePolicy, RoundId, Thresholds, Timing};
    use std::time::Duration;

    fn counter_with_sigma(name: &str, sigma: Option<f64>) -> Counter {
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
            sensitivity: 1.0,
            expected_value: 0.0,
            sigma,
        }
    }

    fn config_with(sigma: Option<f64>) -> RoundConfig {
        RoundConfig {
            round_id: RoundId(1),
            start_after: None,
            counters: CounterTable {
                counters: vec![counter_with_sigma("A", sigma)],
            },
            thresholds: Thresholds {
                dc_threshold: 1,
                sk_threshold: 1,
            },
            timing: Timing {
                collect_period: Duration::from_secs(1),
                checkin_period: Duration::from_secs(1),
                event_period: Duration::from_secs(1),
                delay_period: Duration::from_secs(1),
                start_timeout: Duration::from_secs(1),
                submission_timeout: Duration::from_secs(1),
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

    #[test]
    fn first_round_is_always_accepted() {
        let policy = LocalPolicy::new(0.1);
        assert!(policy.evaluate(&config_with(Some(5.0))).is_ok());
    }

    #[test]
    fn shrinking_sigma_beyond_tolerance_is_refused() {
        let mut policy = LocalPolicy::new(0.1);
        policy.record(&config_with(Some(10.0)));
        assert!(policy.evaluate(&config_with(Some(1.0))).is_err());
    }

    #[test]
    fn small_shrink_within_tolerance_is_accepted() {
        let mut policy = LocalPolicy::new(0.5);
        policy.record(&config_with(Some(10.0)));
        assert!(policy.evaluate(&config_with(Some(9.0))).is_ok());
    }
}
