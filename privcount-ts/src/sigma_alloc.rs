//! Allocates the round's epsilon budget across counters and computes
//! each counter's sigma from its sensitivity and the round's
//! epsilon/delta. The Tally Server draws noise once per counter at
//! tallying time, so sigma has no dependence on which or how many Data
//! Collectors participated.

use std::collections::BTreeMap;

use privcount_core::noise;
use privcount_types::counter::CounterTable;
use privcount_types::round::NoisePolicy;

/// Per-counter sigma, keyed by counter name.
pub type SigmaTable = BTreeMap<String, f64>;

/// Splits the round's epsilon evenly across every non-zero counter (the
/// simple, composition-based allocation: `n` independently noised
/// counters each get `epsilon / n` and the Gaussian mechanism's standard
/// composition bound applies), then computes each counter's sigma.
///
/// Zero counters (validity checks) are excluded from the split since
/// they are not meant to be noised.
pub fn allocate(counters: &CounterTable, policy: &NoisePolicy) -> SigmaTable {
    let contributing: Vec<_> = counters
        .counters
        .iter()
        .filter(|c| !c.is_zero_counter())
        .collect();
    if contributing.is_empty() {
        return SigmaTable::new();
    }
    let per_counter_epsilon = policy.epsilon / contributing.len() as f64;
    contributing
        .into_iter()
        .map(|c| {
            let sigma = noise::sigma_for_counter(c.sensitivity, per_counter_epsilon, policy.delta);
            (c.name.clone(), sigma)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use privcount_types::counter::{Counter, CounterShape, EventSubscription};

    fn counter(name: &str, sensitivity: f64, zero: bool) -> Counter {
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
            sensitivity: if zero { 0.0 } else { sensitivity },
            expected_value: 0.0,
            sigma: None,
        }
    }

    fn policy() -> NoisePolicy {
        NoisePolicy {
            epsilon: 2.0,
            delta: 1e-6,
            sigma_decrease_tolerance: 0.0,
            always_delay: false,
        }
    }

    #[test]
    fn splits_epsilon_evenly_across_non_zero_counters() {
        let table = CounterTable {
            counters: vec![counter("A", 1.0, false), counter("B", 1.0, false)],
        };
        let sigmas = allocate(&table, &policy());
        assert_eq!(sigmas.len(), 2);
        assert!((sigmas["A"] - sigmas["B"]).abs() < 1e-12);
    }

    #[test]
    fn zero_counters_are_excluded_from_allocation() {
        let table = CounterTable {
            counters: vec![counter("A", 1.0, false), counter("Validity.Z", 0.0, true)],
        };
        let sigmas = allocate(&table, &policy());
        assert_eq!(sigmas.len(), 1);
        assert!(sigmas.contains_key("A"));
    }

    #[test]
    fn empty_table_allocates_nothing() {
        let table = CounterTable { counters: vec![] };
        assert!(allocate(&table, &policy()).is_empty());
    }

    #[test]
    fn sigma_does_not_depend_on_counter_count() {
        let one = CounterTable {
            counters: vec![counter("A", 1.0, false)],
        };
        let two = CounterTable {
            counters: vec![counter("A", 1.0, false), counter("B", 1.0, false)],
        };
        // Splitting epsilon across more counters still yields sigma from
        // `sensitivity, epsilon, delta` alone; nothing here should depend
        // on a DC weight that this design has no principled way to
        // compute before quorum.
        let sigma_one = allocate(&one, &policy())["A"];
        let sigma_two = allocate(&two, &policy())["A"];
        assert!(sigma_two > sigma_one);
    }
}
