//! The mutual handshake run once at the start of every peer session:
//! both sides announce their role, fingerprint and a fresh nonce, the
//! responder proves possession of the pre-shared handshake secret, and
//! the initiator proves the same back before the responder trusts the
//! identity it was handed in `Hello`.

use privcount_core::crypto::handshake::{compute_proof, verify_proof};
use privcount_types::fingerprint::{Fingerprint, PeerKind};
use privcount_types::protocol::{Message, Nonce};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::PeerSession;
use crate::ProtoError;

fn role_tag(kind: PeerKind) -> &'static [u8] {
    match kind {
        PeerKind::TallyServer => b"tally-server",
        PeerKind::ShareKeeper => b"share-keeper",
        PeerKind::DataCollector => b"data-collector",
    }
}

fn fresh_nonce(rng: &mut impl RngCore) -> Nonce {
    let mut nonce = [0u8; 32];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// Runs the initiator's side of the handshake: sends `Hello`, receives
/// `HelloAck` and verifies the responder's proof, then sends
/// `HelloConfirm` proving the initiator's own possession of the secret
/// back to the responder.
///
/// Returns the verified peer's fingerprint.
pub async fn initiate<S: AsyncRead + AsyncWrite + Unpin>(
    session: &mut PeerSession<S>,
    self_kind: PeerKind,
    self_fingerprint: Fingerprint,
    handshake_secret: &[u8],
    peer_role_tag: PeerKind,
    rng: &mut impl RngCore,
) -> Result<Fingerprint, ProtoError> {
    let initiator_nonce = fresh_nonce(rng);
    session
        .send(Message::Hello {
            peer_kind: self_kind,
            fingerprint: self_fingerprint,
            nonce: initiator_nonce,
            protocol_version: privcount_types::PROTOCOL_VERSION,
        })
        .await?;

    let (responder_fingerprint, responder_nonce, proof) = session
        .expect("HelloAck", |m| match m {
            Message::HelloAck {
                fingerprint,
                nonce,
                proof,
            } => Ok((fingerprint, nonce, proof)),
            other => Err(other),
        })
        .await?;

    verify_proof(
        handshake_secret,
        role_tag(peer_role_tag),
        &initiator_nonce,
        &responder_nonce,
        responder_fingerprint,
        &proof,
    )
    .map_err(|_| ProtoError::HandshakeFailed)?;

    let confirm_proof = compute_proof(
        handshake_secret,
        role_tag(self_kind),
        &initiator_nonce,
        &responder_nonce,
        self_fingerprint,
    );
    session
        .send(Message::HelloConfirm {
            proof: confirm_proof,
        })
        .await?;

    Ok(responder_fingerprint)
}

/// Runs the responder's side of the handshake: receives `Hello`, checks
/// the protocol version, sends back a `HelloAck` with a computed proof,
/// then awaits and verifies the initiator's `HelloConfirm` before
/// trusting the identity it declared in `Hello`.
///
/// Returns the verified peer's declared role and fingerprint.
pub async fn respond<S: AsyncRead + AsyncWrite + Unpin>(
    session: &mut PeerSession<S>,
    self_kind: PeerKind,
    self_fingerprint: Fingerprint,
    handshake_secret: &[u8],
    rng: &mut impl RngCore,
) -> Result<(PeerKind, Fingerprint), ProtoError> {
    let (peer_kind, peer_fingerprint, initiator_nonce, protocol_version) = session
        .expect("Hello", |m| match m {
            Message::Hello {
                peer_kind,
                fingerprint,
                nonce,
                protocol_version,
            } => Ok((peer_kind, fingerprint, nonce, protocol_version)),
            other => Err(other),
        })
        .await?;

    if protocol_version != privcount_types::PROTOCOL_VERSION {
        return Err(ProtoError::UnsupportedVersion(protocol_version));
    }

    let responder_nonce = fresh_nonce(rng);
    let proof = compute_proof(
        handshake_secret,
        role_tag(self_kind),
        &initiator_nonce,
        &responder_nonce,
        self_fingerprint,
    );

    session
        .send(Message::HelloAck {
            fingerprint: self_fingerprint,
            nonce: responder_nonce,
            proof,
        })
        .await?;

    let confirm_proof = session
        .expect("HelloConfirm", |m| match m {
            Message::HelloConfirm { proof } => Ok(proof),
            other => Err(other),
        })
        .await?;

    verify_proof(
        handshake_secret,
        role_tag(peer_kind),
        &initiator_nonce,
        &responder_nonce,
        peer_fingerprint,
        &confirm_proof,
    )
    .map_err(|_| ProtoError::HandshakeFailed)?;

    Ok((peer_kind, peer_fingerprint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[tokio::test]
    async fn initiator_and_responder_agree_on_fingerprints() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_session = PeerSession::new(client);
        let mut server_session = PeerSession::new(server);

        let secret = b"shared-handshake-secret";
        let client_fp = Fingerprint::of_der(b"client-key");
        let server_fp = Fingerprint::of_der(b"server-key");

        let client_task = tokio::spawn(async move {
            let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(1);
            initiate(
                &mut client_session,
                PeerKind::DataCollector,
                client_fp,
                secret,
                PeerKind::ShareKeeper,
                &mut rng,
            )
            .await
        });

        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(2);
        let (observed_client_kind, observed_client_fp) = respond(
            &mut server_session,
            PeerKind::ShareKeeper,
            server_fp,
            secret,
            &mut rng,
        )
        .await
        .unwrap();

        let observed_server_fp = client_task.await.unwrap().unwrap();
        assert_eq!(observed_client_kind, PeerKind::DataCollector);
        assert_eq!(observed_client_fp, client_fp);
        assert_eq!(observed_server_fp, server_fp);
    }

    #[tokio::test]
    async fn mismatched_secret_fails_verification() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_session = PeerSession::new(client);
        let mut server_session = PeerSession::new(server);

        let client_fp = Fingerprint::of_der(b"client-key");
        let server_fp = Fingerprint::of_der(b"server-key");

        let client_task = tokio::spawn(async move {
            let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(1);
            initiate(
                &mut client_session,
                PeerKind::DataCollector,
                client_fp,
                b"client-side-secret",
                PeerKind::ShareKeeper,
                &mut rng,
            )
            .await
        });

        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(2);
        let _ = respond(
            &mut server_session,
            PeerKind::ShareKeeper,
            server_fp,
            b"server-side-secret",
            &mut rng,
        )
        .await
        .unwrap();

        let result = client_task.await.unwrap();
        assert!(matches!(result, Err(ProtoError::HandshakeFailed)));
    }

    #[tokio::test]
    async fn responder_rejects_a_bad_initiator_confirm() {
        let (client, server) = tokio::io::duplex(4096);
        let mut client_session = PeerSession::new(client);
        let mut server_session = PeerSession::new(server);

        let client_fp = Fingerprint::of_der(b"client-key");
        let server_fp = Fingerprint::of_der(b"server-key");

        // A initiator that knows the shared secret well enough to pass
        // the responder's own proof, but forges its `HelloConfirm`
        // instead of deriving it from the handshake.
        let client_task = tokio::spawn(async move {
            let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(1);
            let secret = b"shared-handshake-secret";
            let initiator_nonce = fresh_nonce(&mut rng);
            client_session
                .send(Message::Hello {
                    peer_kind: PeerKind::DataCollector,
                    fingerprint: client_fp,
                    nonce: initiator_nonce,
                    protocol_version: privcount_types::PROTOCOL_VERSION,
                })
                .await
                .unwrap();

            let (_, responder_nonce, proof) = client_session
                .expect("HelloAck", |m| match m {
                    Message::HelloAck { fingerprint, nonce, proof } => Ok((fingerprint, nonce, proof)),
                    other => Err(other),
                })
                .await
                .unwrap();
            verify_proof(
                secret,
                role_tag(PeerKind::ShareKeeper),
                &initiator_nonce,
                &responder_nonce,
                server_fp,
                &proof,
            )
            .unwrap();

            client_session
                .send(Message::HelloConfirm {
                    proof: b"not a real proof".to_vec(),
                })
                .await
                .unwrap();
        });

        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(2);
        let result = respond(
            &mut server_session,
            PeerKind::ShareKeeper,
            server_fp,
            b"shared-handshake-secret",
            &mut rng,
        )
        .await;

        client_task.await.unwrap();
        assert!(matches!(result, Err(ProtoError::HandshakeFailed)));
    }
}
