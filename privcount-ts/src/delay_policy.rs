//! Whether the inter-round delay must be enforced before a new round may
//! start, given the sigma this round would use compared to the last
//! published round.

use privcount_core::noise;
use privcount_types::round::NoisePolicy;
use std::collections::BTreeMap;
use std::time::Duration;

/// Tracks the last published sigma per counter, so successive rounds can
/// detect a material privacy-budget decrease.
#[derive(Debug, Default, Clone)]
pub struct SigmaHistory {
    last_sigma: BTreeMap<String, f64>,
}

impl SigmaHistory {
    /// Records the sigma used for `counter` in a just-published round.
    pub fn record(&mut self, counter: &str, sigma: f64) {
        self.last_sigma.insert(counter.to_string(), sigma);
    }

    /// Decides whether `policy.delay_period` must be enforced before
    /// this round's collection can start, given the proposed sigmas.
    pub fn delay_required(&self, proposed: &BTreeMap<String, f64>, policy: &NoisePolicy) -> bool {
        if policy.always_delay {
            return true;
        }
        proposed.iter().any(|(counter, &new_sigma)| {
            noise::delay_required(
                self.last_sigma.get(counter).copied(),
                new_sigma,
                policy.sigma_decrease_tolerance,
                false,
            )
        })
    }
}

/// Returns the effective delay to sleep before starting collection: zero
/// if the policy doesn't require one.
pub fn effective_delay(required: bool, delay_period: Duration) -> Duration {
    if required {
        delay_period
    } else {
        Duration::ZERO
    }
}
