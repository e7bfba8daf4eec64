//! RSA-OAEP(SHA-256) wrapping of the 256-bit share seeds relayed through
//! the Tally Server between a Data Collector and a Share Keeper.

use privcount_types::share::{Seed, SEED_BYTES};
use rand::{CryptoRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use super::CryptoError;

/// Encrypts `seed` under `recipient_public_key` using RSA-OAEP with
/// SHA-256 as both the hash and MGF1 digest.
pub fn wrap_seed(
    seed: &Seed,
    recipient_public_key: &RsaPublicKey,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<u8>, CryptoError> {
    let padding = Oaep::new::<Sha256>();
    recipient_public_key
        .encrypt(rng, padding, seed.reveal())
        .map_err(|e| CryptoError::Rsa(e.to_string()))
}

/// Decrypts an RSA-OAEP ciphertext back into a [`Seed`], rejecting
/// anything that does not decrypt to exactly [`SEED_BYTES`] bytes.
pub fn unwrap_seed(
    ciphertext: &[u8],
    private_key: &RsaPrivateKey,
) -> Result<Seed, CryptoError> {
    let padding = Oaep::new::<Sha256>();
    let plaintext = private_key
        .decrypt(padding, ciphertext)
        .map_err(|e| CryptoError::Rsa(e.to_string()))?;
    if plaintext.len() != SEED_BYTES {
        return Err(CryptoError::BadLength {
            expected: SEED_BYTES,
            actual: plaintext.len(),
        });
    }
    let mut bytes = [0u8; SEED_BYTES];
    bytes.copy_from_slice(&plaintext);
    Ok(Seed::from_bytes(bytes))
}
