//! The mutual HMAC-SHA256 handshake two peers run at session start,
//! proving possession of a pre-shared handshake secret without sending
//! it, and binding both fingerprints and both nonces into the proof so a
//! relayed `Hello` cannot be replayed against a different peer.

use hmac::{Hmac, Mac};
use privcount_types::fingerprint::Fingerprint;
use privcount_types::protocol::Nonce;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Computes the handshake proof a responder sends back in `HelloAck`:
/// `HMAC(secret, role_tag || initiator_nonce || responder_nonce ||
/// responder_fingerprint)`.
pub fn compute_proof(
    secret: &[u8],
    role_tag: &[u8],
    initiator_nonce: &Nonce,
    responder_nonce: &Nonce,
    responder_fingerprint: Fingerprint,
) -> Vec<u8> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(role_tag);
    mac.update(initiator_nonce);
    mac.update(responder_nonce);
    mac.update(responder_fingerprint.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Verifies a proof produced by [`compute_proof`], in constant time.
pub fn verify_proof(
    secret: &[u8],
    role_tag: &[u8],
    initiator_nonce: &Nonce,
    responder_nonce: &Nonce,
    responder_fingerprint: Fingerprint,
    proof: &[u8],
) -> Result<(), CryptoError> {
    let expected = compute_proof(
        secret,
        role_tag,
        initiator_nonce,
        responder_nonce,
        responder_fingerprint,
    );
    if expected.ct_eq(proof).into() {
        Ok(())
    } else {
        Err(CryptoError::HandshakeProof)
    }
}
