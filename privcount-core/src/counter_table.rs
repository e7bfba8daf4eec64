//! Bin lookup and blinded share initialization.
//!
//! Bin lookup runs in `O(log b)` per event via binary search over the
//! sorted bin edges. Values outside every declared bin land in the first
//! or last bin rather than being dropped.

use privcount_types::counter::{Counter, CounterShape};
use privcount_types::share::{Seed, ShareMap};

use crate::field::Ring;
use crate::keystream;

/// Looks up the bin index for `value` within `counter`.
///
/// For [`CounterShape::Scalar`] counters this always returns `0`. For
/// histogram counters, binary search locates the bin whose half-open
/// interval contains `value`; values below the first bin's lower edge
/// clamp into bin `0`, and values at or above the last bin's upper edge
/// clamp into the last bin.
pub fn bin_index(counter: &Counter, value: f64) -> usize {
    match &counter.shape {
        CounterShape::Scalar => 0,
        CounterShape::Histogram { bins } => {
            if bins.is_empty() {
                return 0;
            }
            if value < bins[0].lo.as_f64() {
                return 0;
            }
            // Binary search for the largest bin whose lower edge is at or
            // below `value`; bins are sorted ascending and non-overlapping,
            // so this is exactly the containing bin, with values past the
            // last edge clamping into the last bin.
            let last = bins.len() - 1;
            let mut lo = 0usize;
            let mut hi = last;
            while lo < hi {
                let mid = (lo + hi + 1) / 2;
                if bins[mid].lo.as_f64() <= value {
                    lo = mid;
                } else {
                    hi = mid - 1;
                }
            }
            lo
        }
    }
}

/// Computes the blinded initial share value for `(counter, bin)` as seen
/// by a Data Collector: the sum, over every Share Keeper it has
/// exchanged a seed with, of that pairing's keystream value. Every bin
/// starts blinded by this sum, never at zero.
pub fn dc_initial_share(
    counter_name: &str,
    bin: u64,
    seeds: &[Seed],
    ring: &Ring,
) -> num_bigint::BigUint {
    let mut total = ring.zero();
    for seed in seeds {
        let stream = keystream::derive(seed, counter_name, bin, ring);
        total = ring.add(&total, &stream);
    }
    total
}

/// Computes a Share Keeper's blinding share for `(counter, bin)`: the
/// negation of the sum, over every Data Collector it has exchanged a
/// seed with, of that pairing's keystream value.
pub fn sk_blinding_share(
    counter_name: &str,
    bin: u64,
    seeds: &[Seed],
    ring: &Ring,
) -> num_bigint::BigUint {
    let sum = dc_initial_share(counter_name, bin, seeds, ring);
    ring.sub(&ring.zero(), &sum)
}

/// Initializes every bin of every counter in `counters` to its blinded
/// starting value, for a Data Collector holding `seeds` (one per Share
/// Keeper it paired with).
pub fn initial_share_map(
    counters: &[Counter],
    seeds: &[Seed],
    ring: &Ring,
) -> Result<ShareMap, crate::field::RingError> {
    let mut map = ShareMap::new();
    for counter in counters {
        for bin in 0..counter.bin_count() as u64 {
            let value = dc_initial_share(&counter.name, bin, seeds, ring);
            map.set(&counter.name, bin, ring.to_share_value(&value)?);
        }
    }
    Ok(map)
}

/// Initializes every bin of every counter to a Share Keeper's blinding
/// share, given the seeds it holds for its paired Data Collectors.
pub fn initial_blinding_map(
    counters: &[Counter],
    seeds: &[Seed],
    ring: &Ring,
) -> Result<ShareMap, crate::field::RingError> {
    let mut map = ShareMap::new();
    for counter in counters {
        for bin in 0..counter.bin_count() as u64 {
            let value = sk_blinding_share(&counter.name, bin, seeds, ring);
            map.set(&counter.name, bin, ring.to_share_value(&value)?);
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use privcount_types::counter::{Bin, Edge, EventSubscription};

    fn histogram_counter() -> Counter {
        Counter {
            name: "H".into(),
            shape: CounterShape::Histogram {
                bins: vec![
                    Bin::new(Edge::Finite(0.0), Edge::Finite(10.0)),
                    Bin::new(Edge::Finite(10.0), Edge::Finite(20.0)),
                    Bin::new(Edge::Finite(20.0), Edge::PosInfinity),
                ],
            },
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
            sigma: None,
        }
    }

    #[test]
    fn boundary_values_land_in_upper_bin() {
        // {0, 9, 10, 19, 20, 1e9} against bins [0,10) [10,20) [20,+inf)
        // lands as (2, 2, 2): the first two values in the first bin, the
        // next two in the second, and the last two (including the huge
        // overflow value) clamped into the last bin.
        let c = histogram_counter();
        let mut counts = [0u32; 3];
        for v in [0.0, 9.0, 10.0, 19.0, 20.0, 1e9] {
            counts[bin_index(&c, v)] += 1;
        }
        assert_eq!(counts, [2, 2, 2]);
    }

    #[test]
    fn scalar_counter_always_bins_to_zero() {
        let c = Counter {
            name: "S".into(),
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
            sigma: None,
        };
        assert_eq!(bin_index(&c, -999.0), 0);
        assert_eq!(bin_index(&c, 999.0), 0);
    }

    #[test]
    fn dc_and_sk_shares_cancel_for_shared_seeds() {
        let ring = Ring::from_hex(&"f".repeat(130)).unwrap();
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(1);
        let seed = keystream::generate_seed(&mut rng);
        let dc_share = dc_initial_share("C", 0, std::slice::from_ref(&seed), &ring);
        let sk_share = sk_blinding_share("C", 0, std::slice::from_ref(&seed), &ring);
        assert_eq!(ring.add(&dc_share, &sk_share), ring.zero());
    }
}
