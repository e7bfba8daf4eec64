//! Modular-ring arithmetic over the round's fixed prime `P`.
//!
//! Every share and every keystream value lives in `Z/PZ`. `P` is part of
//! the round configuration (communicated as `prime_modulus_hex`) rather
//! than compiled in, so that every peer is pinned to the same value for
//! a given round.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use privcount_types::share::{ShareValue, SHARE_BYTES};

/// A modular ring `Z/PZ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ring {
    modulus: BigUint,
}

/// Errors constructing or operating over a [`Ring`].
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// The supplied modulus hex string was malformed.
    #[error("invalid prime modulus hex: {0}")]
    InvalidHex(String),
    /// The modulus must be strictly greater than one.
    #[error("prime modulus must be greater than 1")]
    ModulusTooSmall,
    /// A value's big-endian encoding did not fit in [`SHARE_BYTES`].
    #[error("value does not fit in {SHARE_BYTES} bytes")]
    TooLarge,
}

impl Ring {
    /// Builds a ring from the round configuration's hex-encoded modulus.
    pub fn from_hex(hex: &str) -> Result<Self, RingError> {
        let bytes =
            hex_decode(hex).map_err(|_| RingError::InvalidHex(hex.to_string()))?;
        let modulus = BigUint::from_bytes_be(&bytes);
        if modulus <= BigUint::from(1u32) {
            return Err(RingError::ModulusTooSmall);
        }
        Ok(Self { modulus })
    }

    /// Wraps an already-parsed modulus.
    pub fn new(modulus: BigUint) -> Result<Self, RingError> {
        if modulus <= BigUint::from(1u32) {
            return Err(RingError::ModulusTooSmall);
        }
        Ok(Self { modulus })
    }

    /// Returns the modulus `P`.
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// The additive identity.
    pub fn zero(&self) -> BigUint {
        BigUint::zero()
    }

    /// `(a + b) mod P`.
    pub fn add(&self, a: &BigUint, b: &BigUint) -> BigUint {
        (a + b) % &self.modulus
    }

    /// `(a - b) mod P`, always returning a value in `[0, P)`.
    pub fn sub(&self, a: &BigUint, b: &BigUint) -> BigUint {
        let a = a % &self.modulus;
        let b = b % &self.modulus;
        if a >= b {
            &a - &b
        } else {
            &self.modulus - (&b - &a)
        }
    }

    /// `value mod P`, reducing an arbitrarily large input (e.g. a raw PRF
    /// output) into the ring.
    pub fn reduce(&self, value: &BigUint) -> BigUint {
        value % &self.modulus
    }

    /// Sums an iterator of values modulo `P` — the core reconstruction
    /// step at tally time.
    pub fn sum<'a>(&self, values: impl IntoIterator<Item = &'a BigUint>) -> BigUint {
        values
            .into_iter()
            .fold(BigUint::zero(), |acc, v| self.add(&acc, v))
    }

    /// Encodes a ring element as a fixed-width, big-endian [`ShareValue`].
    pub fn to_share_value(&self, value: &BigUint) -> Result<ShareValue, RingError> {
        let reduced = self.reduce(value);
        let be = reduced.to_bytes_be();
        if be.len() > SHARE_BYTES {
            return Err(RingError::TooLarge);
        }
        let mut buf = [0u8; SHARE_BYTES];
        buf[SHARE_BYTES - be.len()..].copy_from_slice(&be);
        Ok(ShareValue::from_be_bytes(buf))
    }

    /// Decodes a [`ShareValue`] back into a ring element.
    pub fn from_share_value(&self, value: ShareValue) -> BigUint {
        self.reduce(&BigUint::from_bytes_be(&value.to_be_bytes()))
    }

    /// Interprets a ring element as a signed integer in `[-P/2, P/2)`.
    /// Legitimate tallies are small relative to `P`, so wraparound past
    /// the midpoint is always read back as a negative value rather than
    /// a huge positive one.
    pub fn to_signed(&self, value: &BigUint) -> BigInt {
        let half = &self.modulus / 2u32;
        let value = value % &self.modulus;
        if value > half {
            BigInt::from_biguint(Sign::Plus, value) - BigInt::from_biguint(Sign::Plus, self.modulus.clone())
        } else {
            BigInt::from_biguint(Sign::Plus, value)
        }
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ring() -> Ring {
        // A 521-bit Mersenne-like prime, large enough to hold any
        // legitimate sum plus noise for these tests.
        Ring::from_hex(&"f".repeat(130)).unwrap()
    }

    #[test]
    fn add_wraps_modulo_p() {
        let ring = Ring::new(BigUint::from(7u32)).unwrap();
        let a = BigUint::from(5u32);
        let b = BigUint::from(5u32);
        assert_eq!(ring.add(&a, &b), BigUint::from(3u32));
    }

    #[test]
    fn sub_never_goes_negative() {
        let ring = Ring::new(BigUint::from(7u32)).unwrap();
        let a = BigUint::from(2u32);
        let b = BigUint::from(5u32);
        assert_eq!(ring.sub(&a, &b), BigUint::from(4u32));
    }

    #[test]
    fn share_value_round_trip() {
        let ring = test_ring();
        let v = BigUint::from(123456789u64);
        let sv = ring.to_share_value(&v).unwrap();
        assert_eq!(ring.from_share_value(sv), v);
    }

    #[test]
    fn signed_interpretation_wraps_large_values_negative() {
        let ring = Ring::new(BigUint::from(11u32)).unwrap();
        // 10 = -1 mod 11
        assert_eq!(ring.to_signed(&BigUint::from(10u32)), BigInt::from(-1));
        assert_eq!(ring.to_signed(&BigUint::from(3u32)), BigInt::from(3));
    }

    #[test]
    fn conservation_sum_of_shares_equals_true_value() {
        let ring = test_ring();
        // Two DCs, true values 3 and 7; one SK.
        let v_dc1 = BigUint::from(3u32);
        let v_dc2 = BigUint::from(7u32);
        let r_dc1 = BigUint::from(1000u32);
        let r_dc2 = BigUint::from(2000u32);
        let s_dc1 = ring.add(&v_dc1, &r_dc1);
        let s_dc2 = ring.add(&v_dc2, &r_dc2);
        let t_sk = ring.sub(&ring.zero(), &ring.add(&r_dc1, &r_dc2));
        let total = ring.sum([&s_dc1, &s_dc2, &t_sk]);
        assert_eq!(ring.to_signed(&total), BigInt::from(10));
    }
}
