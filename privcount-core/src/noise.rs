//! Differential-privacy noise calibration: sigma computation, Gaussian
//! sampling, and the inter-round delay policy.

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use rand::Rng;

/// The classical Gaussian mechanism's sigma for a single counter, given
/// its sensitivity and the per-counter share of the round's epsilon
/// budget and delta.
///
/// Uses the classical (non-analytic) Gaussian mechanism bound
/// `sigma = sensitivity * sqrt(2 * ln(1.25 / delta)) / epsilon`, which is
/// valid for `epsilon < 1`. Counters are expected to divide the round's
/// total epsilon across themselves before calling this.
///
/// Depends only on `sensitivity, epsilon, delta`: the Tally Server is
/// the sole noise sampler, drawing once per counter at tallying time, so
/// there is no principled per-DC weight to scale by, and none is taken
/// as a parameter here.
pub fn sigma_for_counter(sensitivity: f64, epsilon: f64, delta: f64) -> f64 {
    assert!(epsilon > 0.0, "epsilon must be positive");
    assert!(delta > 0.0 && delta < 1.0, "delta must be in (0, 1)");
    sensitivity * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon
}

/// Samples one value from `Normal(0, sigma^2)` using the Box-Muller
/// transform, then rounds to the nearest integer (counters are
/// integer-valued, so only integer noise is meaningful once summed into
/// the ring).
pub fn sample_gaussian_noise(sigma: f64, rng: &mut impl Rng) -> i64 {
    if sigma == 0.0 {
        return 0;
    }
    // Avoid ln(0.0) by excluding the zero endpoint.
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let radius = (-2.0 * u1.ln()).sqrt();
    let z = radius * (2.0 * std::f64::consts::PI * u2).cos();
    (z * sigma).round() as i64
}

/// Adds independently sampled Gaussian noise to a reconstructed signed
/// tally, for every counter's bin.
pub fn apply_noise(true_value: &BigInt, sigma: f64, rng: &mut impl Rng) -> BigInt {
    true_value + BigInt::from(sample_gaussian_noise(sigma, rng))
}

/// Decides whether the inter-round delay should be enforced, given the
/// round's [`crate::noise`]-policy tolerance.
///
/// The delay engages whenever `always_delay` is set, or whenever the
/// new sigma for a counter has shrunk by more than `tolerance` relative
/// to the prior round's sigma for that counter (a materially increased
/// privacy budget spent too quickly is the thing the delay guards
/// against).
pub fn delay_required(
    previous_sigma: Option<f64>,
    new_sigma: f64,
    tolerance: f64,
    always_delay: bool,
) -> bool {
    if always_delay {
        return true;
    }
    match previous_sigma {
        None => false,
        Some(prev) if prev <= 0.0 => false,
        Some(prev) => {
            let shrink_ratio = (prev - new_sigma) / prev;
            shrink_ratio > tolerance
        }
    }
}

/// Converts a ring-reconstructed [`BigInt`] into an `i128` for reporting,
/// saturating rather than panicking if it is implausibly large (which
/// would indicate share corruption rather than a legitimate, noised
/// tally).
pub fn to_reportable(value: &BigInt) -> i128 {
    value.to_i128().unwrap_or(if value.sign() == num_bigint::Sign::Minus {
        i128::MIN
    } else {
        i128::MAX
    })
}
