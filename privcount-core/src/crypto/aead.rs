//! AES-256-GCM sealing of a party's [`ShareMap`] before it crosses the
//! peer protocol.
//!
//! The sealing key is a fresh, random per-submission 256-bit key, itself
//! wrapped under the recipient's RSA public key alongside the ciphertext
//! (so compromise of one submission's key does not expose another's).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use privcount_types::share::ShareMap;
use rand::{CryptoRng, RngCore};

use super::CryptoError;

/// Width, in bytes, of an AES-256-GCM key.
pub const KEY_BYTES: usize = 32;
/// Width, in bytes, of an AES-GCM nonce.
pub const NONCE_BYTES: usize = 12;

/// A sealed share submission: ciphertext plus the nonce it was sealed
/// under.
pub struct SealedShares {
    /// AES-GCM ciphertext (includes the authentication tag).
    pub ciphertext: Vec<u8>,
    /// The 96-bit nonce used for this sealing operation.
    pub nonce: [u8; NONCE_BYTES],
}

/// Serializes `shares` to canonical JSON and seals it under a freshly
/// generated key, associating `associated_data` (typically the round's
/// content hash) so a ciphertext cannot be replayed against a different
/// round.
pub fn seal_shares(
    shares: &ShareMap,
    key: &[u8; KEY_BYTES],
    associated_data: &[u8],
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<SealedShares, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_BYTES];
    rng.fill_bytes(&mut nonce_bytes);
    let plaintext = serde_json::to_vec(shares).map_err(|_| CryptoError::Aead)?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: &plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::Aead)?;
    Ok(SealedShares {
        ciphertext,
        nonce: nonce_bytes,
    })
}

/// Opens a sealed share submission, verifying the authentication tag and
/// the associated data before returning the recovered [`ShareMap`].
pub fn open_shares(
    sealed: &SealedShares,
    key: &[u8; KEY_BYTES],
    associated_data: &[u8],
) -> Result<ShareMap, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::Aead)?;
    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Aead)
}

/// Generates a fresh random AES-256-GCM key for one share submission.
pub fn generate_key(rng: &mut impl RngCore) -> [u8; KEY_BYTES] {
    let mut bytes = [0u8; KEY_BYTES];
    rng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn shares_round_trip_through_seal_and_open() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(5);
        let key = generate_key(&mut rng);
        let mut shares = ShareMap::new();
        shares.set(
            "Counter.A",
            0,
            privcount_types::share::ShareValue::from_be_bytes([7u8; 64]),
        );
        let aad = b"round-content-hash";
        let sealed = seal_shares(&shares, &key, aad, &mut rng).unwrap();
        let recovered = open_shares(&sealed, &key, aad).unwrap();
        assert_eq!(recovered.len(), shares.len());
    }

    #[test]
    fn wrong_associated_data_is_rejected() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(6);
        let key = generate_key(&mut rng);
        let shares = ShareMap::new();
        let sealed = seal_shares(&shares, &key, b"round-a", &mut rng).unwrap();
        assert!(open_shares(&sealed, &key, b"round-b").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(8);
        let key = generate_key(&mut rng);
        let shares = ShareMap::new();
        let mut sealed = seal_shares(&shares, &key, b"round-a", &mut rng).unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0xFF;
        assert!(open_shares(&sealed, &key, b"round-a").is_err());
    }
}
