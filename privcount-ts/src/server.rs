//! The Tally Server's network bootstrap: accepts peer connections, runs
//! the mutual handshake, and drives one round's coordinator from quorum
//! through publication.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use privcount_core::crypto::aead::{self, SealedShares};
use privcount_core::crypto::rsa_seed;
use privcount_core::field::Ring;
use privcount_proto::handshake;
use privcount_proto::tls::{build_acceptor, install_crypto_provider, load_certs, load_private_key};
use privcount_proto::{PeerSession, ProtoError};
use privcount_types::error::{ErrorKind, PrivcountError};
use privcount_types::fingerprint::{Fingerprint, FingerprintPattern, PeerKind};
use privcount_types::outcome::Outcome;
use privcount_types::protocol::Message;
use privcount_types::round::RoundConfig;
use rand::SeedableRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, instrument, warn};

use crate::config::TallyServerConfig;
use crate::coordinator::Coordinator;
use crate::delay_policy::{self, SigmaHistory};

/// One event a connection handler reports to the round orchestrator.
enum PeerEvent {
    Registered {
        fingerprint: Fingerprint,
        outgoing: mpsc::UnboundedSender<Message>,
    },
    ConfigAck {
        kind: PeerKind,
        fingerprint: Fingerprint,
        accept: bool,
    },
    ShareSubmit {
        kind: PeerKind,
        fingerprint: Fingerprint,
        shares: privcount_types::share::ShareMap,
    },
    /// A DC's seed, relayed verbatim to the named SK.
    SeedRelay {
        to: Fingerprint,
        msg: Message,
    },
    Disconnected {
        fingerprint: Fingerprint,
    },
}

/// The Tally Server's listening half.
pub struct TallyServer {
    ts_config: Arc<TallyServerConfig>,
    acceptor: TlsAcceptor,
    rsa_private_key: RsaPrivateKey,
    own_fingerprint: Fingerprint,
}

impl TallyServer {
    /// Loads TLS and RSA identity material and builds the mutual-TLS
    /// acceptor. Does not bind a socket yet.
    ///
    /// Takes the config behind an `Arc` so a process that runs several
    /// rounds back to back (see `continue_count`) can rebind a fresh
    /// [`TallyServer`] for each one without re-reading or cloning secret
    /// material from disk.
    pub fn bind(ts_config: Arc<TallyServerConfig>) -> Result<Self, PrivcountError> {
        install_crypto_provider();
        let certs = load_certs(&ts_config.tls_cert_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let key = load_private_key(&ts_config.tls_key_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let trusted_ca = load_certs(&ts_config.tls_trusted_ca_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let acceptor = build_acceptor(certs, key, trusted_ca)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;

        let rsa_private_key = RsaPrivateKey::read_pkcs8_pem_file(&ts_config.rsa_private_key_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let public_key_der = RsaPublicKey::from(&rsa_private_key)
            .to_public_key_der()
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let own_fingerprint = Fingerprint::of_der(public_key_der.as_bytes());

        Ok(Self {
            ts_config,
            acceptor,
            rsa_private_key,
            own_fingerprint,
        })
    }

    /// Runs exactly one round to completion: accepts connections,
    /// distributes `round_config`, gates on quorum, relays `Start`/`Stop`,
    /// collects shares, and returns the reconstructed, noised outcome.
    ///
    /// `sigma_history` carries the last published sigma per counter
    /// across rounds (a fresh [`TallyServer`] is bound each round, see
    /// [`TallyServer::bind`], but the history survives in the caller)
    /// so this round's delay policy can be decided before quorum is even
    /// reached: `allocate_sigma` depends only on `round_config`, not on
    /// which peers end up acknowledging, so the proposed sigmas and the
    /// delay decision are both available up front and the same table is
    /// reused unchanged at tallying time.
    pub async fn run(
        self,
        round_config: RoundConfig,
        sigma_history: &mut SigmaHistory,
    ) -> Result<Outcome, PrivcountError> {
        Ring::from_hex(&round_config.prime_modulus_hex)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        check_start_after(&round_config)?;

        let listener = TcpListener::bind(self.ts_config.listen_addr)
            .await
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;
        info!(addr = %self.ts_config.listen_addr, "tally server listening");

        let coordinator = Arc::new(Mutex::new(
            Coordinator::new(round_config.clone())
                .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?,
        ));
        coordinator.lock().await.begin_distribution().ok();

        let sigmas = coordinator.lock().await.allocate_sigma();
        let delay_required = sigma_history.delay_required(&sigmas, &round_config.noise);

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<PeerEvent>();
        let outgoing: Arc<Mutex<HashMap<Fingerprint, mpsc::UnboundedSender<Message>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let accept_handle = {
            let acceptor = self.acceptor.clone();
            let handshake_secret =
                secrecy::ExposeSecret::expose_secret(&self.ts_config.handshake_secret).to_owned();
            let own_fingerprint = self.own_fingerprint;
            let rsa_private_key = self.rsa_private_key.clone();
            let round_config = round_config.clone();
            let round_content_hash = round_config.content_hash().to_string();
            let allowed_peers = self.ts_config.allowed_peers.clone();
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                loop {
                    let (stream, peer_addr) = match listener.accept().await {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let handshake_secret = handshake_secret.clone();
                    let rsa_private_key = rsa_private_key.clone();
                    let round_config = round_config.clone();
                    let round_content_hash = round_content_hash.clone();
                    let allowed_peers = allowed_peers.clone();
                    let events_tx = events_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(
                            stream,
                            acceptor,
                            handshake_secret.as_bytes(),
                            own_fingerprint,
                            rsa_private_key,
                            round_config,
                            round_content_hash,
                            &allowed_peers,
                            events_tx,
                        )
                        .await
                        {
                            debug!(%peer_addr, error = %e, "connection ended");
                        }
                    });
                }
            })
        };

        // Wait for quorum before anything proceeds past `Starting`.
        loop {
            match events_rx.recv().await {
                Some(PeerEvent::Registered { fingerprint, outgoing: sender }) => {
                    outgoing.lock().await.insert(fingerprint, sender);
                }
                Some(PeerEvent::ConfigAck { kind, fingerprint, accept }) => {
                    let mut c = coordinator.lock().await;
                    c.record_ack(kind, fingerprint, accept);
                    if c.quorum_met() {
                        break;
                    }
                }
                Some(PeerEvent::Disconnected { .. }) => {}
                Some(PeerEvent::ShareSubmit { .. }) => {}
                Some(PeerEvent::SeedRelay { .. }) => {}
                None => {
                    accept_handle.abort();
                    return Err(PrivcountError::new(
                        ErrorKind::QuorumNotMet,
                        "no peers connected before shutdown",
                    ));
                }
            }
        }

        if delay_required {
            let wait = delay_policy::effective_delay(true, round_config.timing.delay_period);
            info!(delay = ?wait, "sigma decreased beyond tolerance, enforcing inter-round delay");
            tokio::time::sleep(wait).await;
        }

        coordinator
            .lock()
            .await
            .start_collecting(wall_clock_timestamp())
            .inspect_err(|_| accept_handle.abort())?;
        broadcast(&outgoing, Message::Start).await;

        // DCs exchange seeds with every SK over this window before
        // counting; relay those envelopes as they arrive without
        // interrupting the collection timer.
        let collect_deadline = tokio::time::sleep(round_config.timing.collect_period);
        tokio::pin!(collect_deadline);
        loop {
            tokio::select! {
                _ = &mut collect_deadline => break,
                event = events_rx.recv() => {
                    match event {
                        Some(PeerEvent::SeedRelay { to, msg }) => {
                            if let Some(sender) = outgoing.lock().await.get(&to) {
                                let _ = sender.send(msg);
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }

        coordinator
            .lock()
            .await
            .stop_collecting(wall_clock_timestamp())
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;
        broadcast(&outgoing, Message::Stop).await;

        let deadline = tokio::time::sleep(round_config.timing.submission_timeout);
        tokio::pin!(deadline);
        loop {
            if coordinator.lock().await.all_shares_in() {
                break;
            }
            tokio::select! {
                _ = &mut deadline => break,
                event = events_rx.recv() => {
                    match event {
                        Some(PeerEvent::ShareSubmit { kind, fingerprint, shares }) => {
                            coordinator.lock().await.submit_shares(kind, fingerprint, shares);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }

        accept_handle.abort();

        let mut rng = rand_chacha::ChaCha20Rng::from_entropy();
        let outcome = coordinator.lock().await.tally(
            &sigmas,
            privcount_types::software_version(),
            wall_clock_timestamp(),
            &mut rng,
        )?;
        for (counter, sigma) in &sigmas {
            sigma_history.record(counter, *sigma);
        }
        Ok(outcome)
    }
}

/// Rejects a round whose `start_after` deadline has already passed, so a
/// stale configuration (delivered late, or left behind after a process
/// restart) cannot silently start collecting under the wrong noise or
/// quorum assumptions.
fn check_start_after(round_config: &RoundConfig) -> Result<(), PrivcountError> {
    let Some(deadline) = &round_config.start_after else {
        return Ok(());
    };
    let parsed = humantime::parse_rfc3339(deadline).map_err(|e| {
        PrivcountError::new(
            ErrorKind::ConfigInvalid,
            format!("start_after {deadline:?} is not a valid RFC 3339 timestamp: {e}"),
        )
    })?;
    if SystemTime::now() > parsed {
        return Err(PrivcountError::new(
            ErrorKind::QuorumNotMet,
            format!("round's start_after deadline ({deadline}) has already passed"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use privcount_test_utils::sample_round_config;

    #[test]
    fn missing_start_after_is_always_accepted() {
        let cfg = sample_round_config();
        assert!(cfg.start_after.is_none());
        assert!(check_start_after(&cfg).is_ok());
    }

    #[test]
    fn start_after_in_the_past_is_rejected() {
        let mut cfg = sample_round_config();
        cfg.start_after = Some("2000-01-01T00:00:00Z".to_string());
        let err = check_start_after(&cfg).unwrap_err();
        assert_eq!(err.kind, ErrorKind::QuorumNotMet);
    }

    #[test]
    fn start_after_in_the_future_is_accepted() {
        let mut cfg = sample_round_config();
        cfg.start_after = Some("2999-01-01T00:00:00Z".to_string());
        assert!(check_start_after(&cfg).is_ok());
    }

    #[test]
    fn malformed_start_after_is_config_invalid() {
        let mut cfg = sample_round_config();
        cfg.start_after = Some("not-a-timestamp".to_string());
        let err = check_start_after(&cfg).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigInvalid);
    }
}

async fn broadcast(
    outgoing: &Arc<Mutex<HashMap<Fingerprint, mpsc::UnboundedSender<Message>>>>,
    msg: Message,
) {
    for sender in outgoing.lock().await.values() {
        let _ = sender.send(msg.clone());
    }
}

#[instrument(skip_all)]
async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    handshake_secret: &[u8],
    own_fingerprint: Fingerprint,
    rsa_private_key: RsaPrivateKey,
    round_config: RoundConfig,
    round_content_hash: String,
    allowed_peers: &[FingerprintPattern],
    events_tx: mpsc::UnboundedSender<PeerEvent>,
) -> Result<(), ProtoError> {
    let tls_stream = acceptor.accept(stream).await?;
    let mut session = PeerSession::new(tls_stream);

    let mut rng = rand::rngs::StdRng::from_entropy();
    let (peer_kind, peer_fingerprint) = handshake::respond(
        &mut session,
        PeerKind::TallyServer,
        own_fingerprint,
        handshake_secret,
        &mut rng,
    )
    .await?;

    if !allowed_peers.iter().any(|pattern| pattern.matches(peer_fingerprint)) {
        warn!(%peer_fingerprint, ?peer_kind, "peer is not on the allow-list");
        return Err(ProtoError::UnknownPeer(peer_fingerprint));
    }

    session
        .send(Message::RoundConfig {
            config: round_config.clone(),
        })
        .await?;

    let accept = session
        .expect("ConfigAck", |m| match m {
            Message::ConfigAck { accept, .. } => Ok(accept),
            other => Err(other),
        })
        .await?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    events_tx
        .send(PeerEvent::Registered {
            fingerprint: peer_fingerprint,
            outgoing: out_tx,
        })
        .ok();
    events_tx
        .send(PeerEvent::ConfigAck {
            kind: peer_kind,
            fingerprint: peer_fingerprint,
            accept,
        })
        .ok();

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(msg) => session.send(msg).await?,
                    None => break,
                }
            }
            inbound = session.recv() => {
                match inbound {
                    Ok(Message::ShareSubmit { sealed_shares, aead_nonce, wrapped_key }) => {
                        let seed = rsa_seed::unwrap_seed(&wrapped_key, &rsa_private_key)
                            .map_err(|_| ProtoError::HandshakeFailed)?;
                        let mut key = [0u8; aead::KEY_BYTES];
                        key.copy_from_slice(seed.reveal());
                        let sealed = SealedShares {
                            ciphertext: sealed_shares,
                            nonce: aead_nonce,
                        };
                        let shares = aead::open_shares(&sealed, &key, round_content_hash.as_bytes())
                            .map_err(|_| ProtoError::HandshakeFailed)?;
                        events_tx
                            .send(PeerEvent::ShareSubmit {
                                kind: peer_kind,
                                fingerprint: peer_fingerprint,
                                shares,
                            })
                            .ok();
                    }
                    Ok(msg @ Message::Seed { to_sk, .. }) => {
                        events_tx
                            .send(PeerEvent::SeedRelay { to: to_sk, msg })
                            .ok();
                    }
                    Ok(Message::Status { .. }) => continue,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        }
    }

    events_tx
        .send(PeerEvent::Disconnected {
            fingerprint: peer_fingerprint,
        })
        .ok();
    Ok(())
}

fn wall_clock_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("unix:{}", now.as_secs())
}
