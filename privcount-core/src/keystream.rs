//! The deterministic, domain-separated PRF keystream used to blind
//! shares.
//!
//! For seed `s`, counter name `n`, and bin index `i`:
//! `stream(s, n, i) = PRF(s, encode(n) || encode(i))`, interpreted as an
//! integer in `[0, P)`. The encoding is fixed precisely so the Tally
//! Server, every Share Keeper, and every Data Collector independently
//! reproduce the same value: big-endian length prefixes, UTF-8 counter
//! names, 64-bit bin indices, and the domain-separation label
//! `"privcount/v1/share-stream"`.

use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use privcount_types::share::{Seed, SEED_BYTES};
use sha2::Sha256;

use crate::field::Ring;

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation label mixed into every keystream derivation.
pub const DOMAIN_LABEL: &[u8] = b"privcount/v1/share-stream";

/// Number of extra bytes of PRF output drawn beyond the modulus width,
/// to keep the modular-reduction bias on `stream()`'s output negligible.
const EXTRA_BYTES: usize = 16;

/// Derives `stream(seed, counter_name, bin_index) mod P`.
///
/// Expands the seed into as many 32-byte HMAC-SHA256 blocks as needed to
/// cover the modulus width plus [`EXTRA_BYTES`] of slack, then reduces
/// into the ring. Each block is
/// `HMAC-SHA256(seed, label || u32_be(len(name)) || name || u64_be(bin_index) || u32_be(block_index))`.
pub fn derive(seed: &Seed, counter_name: &str, bin_index: u64, ring: &Ring) -> BigUint {
    let needed_bytes = ring.modulus().to_bytes_be().len() + EXTRA_BYTES;
    let mut output = Vec::with_capacity(needed_bytes + 32);
    let mut block_index: u32 = 0;
    while output.len() < needed_bytes {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(seed.reveal())
            .expect("HMAC accepts any key length");
        mac.update(DOMAIN_LABEL);
        mac.update(&(counter_name.len() as u32).to_be_bytes());
        mac.update(counter_name.as_bytes());
        mac.update(&bin_index.to_be_bytes());
        mac.update(&block_index.to_be_bytes());
        output.extend_from_slice(&mac.finalize().into_bytes());
        block_index += 1;
    }
    ring.reduce(&BigUint::from_bytes_be(&output))
}

/// Generates a fresh, uniformly random 256-bit share seed.
pub fn generate_seed(rng: &mut impl rand::RngCore) -> Seed {
    let mut bytes = [0u8; SEED_BYTES];
    rng.fill_bytes(&mut bytes);
    Seed::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn test_ring() -> Ring {
        Ring::from_hex(&"f".repeat(130)).unwrap()
    }

    #[test]
    fn derivation_is_deterministic() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(42);
        let seed = generate_seed(&mut rng);
        let ring = test_ring();
        let a = derive(&seed, "Counter.A", 0, &ring);
        let b = derive(&seed, "Counter.A", 0, &ring);
        assert_eq!(a, b);
    }

    #[test]
    fn derivation_is_domain_separated_by_name_and_bin() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(42);
        let seed = generate_seed(&mut rng);
        let ring = test_ring();
        let a = derive(&seed, "Counter.A", 0, &ring);
        let b = derive(&seed, "Counter.A", 1, &ring);
        let c = derive(&seed, "Counter.B", 0, &ring);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn dc_and_sk_derive_the_cancelling_stream_from_the_same_seed() {
        // Both sides of a pairing hold the same seed and so derive the
        // same stream value; the DC adds it, the SK's share is the
        // negation of the same value.
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(7);
        let seed = generate_seed(&mut rng);
        let ring = test_ring();
        let dc_view = derive(&seed, "Counter.X", 2, &ring);
        let sk_view = derive(&seed, "Counter.X", 2, &ring);
        assert_eq!(dc_view, sk_view);
        let cancelled = ring.add(&dc_view, &ring.sub(&ring.zero(), &sk_view));
        assert_eq!(cancelled, BigUint::from(0u32));
    }
}
