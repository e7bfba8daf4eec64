//! The Share Keeper's side of one round: handshake with the Tally
//! Server, accept relayed Data Collector seeds, and at `Stop` submit the
//! round's blinding shares.

use std::collections::BTreeMap;

use privcount_core::counter_table;
use privcount_core::crypto::{aead, rsa_seed};
use privcount_core::field::Ring;
use privcount_proto::tls::{build_connector, install_crypto_provider, load_certs, load_private_key};
use privcount_proto::{handshake, PeerSession};
use privcount_types::error::{ErrorKind, PrivcountError};
use privcount_types::fingerprint::{Fingerprint, PeerKind};
use privcount_types::protocol::Message;
use privcount_types::round::RoundConfig;
use privcount_types::share::Seed;
use rand::SeedableRng;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::{info, warn};

use crate::config::ShareKeeperConfig;
use crate::policy::LocalPolicy;

/// What became of one round this Share Keeper was offered.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The round was accepted and this Share Keeper submitted its
    /// blinding shares.
    Submitted,
    /// The round configuration was refused before counting began.
    Rejected {
        /// The refusal reason reported to the Tally Server.
        reason: String,
    },
}

/// A Share Keeper's long-lived identity and local acceptance policy.
pub struct ShareKeeper {
    sk_config: ShareKeeperConfig,
    rsa_private_key: RsaPrivateKey,
    fingerprint: Fingerprint,
    ts_public_key: RsaPublicKey,
    policy: LocalPolicy,
}

impl ShareKeeper {
    /// Loads this Share Keeper's RSA identity and the Tally Server's
    /// public key. Does not open a connection yet.
    pub fn bind(sk_config: ShareKeeperConfig) -> Result<Self, PrivcountError> {
        install_crypto_provider();
        let rsa_private_key = RsaPrivateKey::read_pkcs8_pem_file(&sk_config.rsa_private_key_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let fingerprint = fingerprint_of(&RsaPublicKey::from(&rsa_private_key))?;
        let ts_public_key = RsaPublicKey::read_public_key_pem_file(&sk_config.ts_rsa_public_key_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let tolerance = sk_config.sigma_decrease_tolerance;
        Ok(Self {
            sk_config,
            rsa_private_key,
            fingerprint,
            ts_public_key,
            policy: LocalPolicy::new(tolerance),
        })
    }

    /// Connects to the Tally Server and runs exactly one round: handshake,
    /// round configuration acceptance, seed collection, and (if accepted)
    /// share submission.
    pub async fn run_round(&mut self) -> Result<RoundOutcome, PrivcountError> {
        let trusted_ca = load_certs(&self.sk_config.tls_trusted_ca_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let cert_chain = load_certs(&self.sk_config.tls_cert_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let key = load_private_key(&self.sk_config.tls_key_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let connector = build_connector(cert_chain, key, trusted_ca)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;

        let stream = TcpStream::connect(self.sk_config.ts_addr)
            .await
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;
        let server_name = ServerName::try_from("localhost")
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;
        let mut session = PeerSession::new(tls_stream);

        let mut rng = rand_chacha::ChaCha20Rng::from_entropy();
        handshake::initiate(
            &mut session,
            PeerKind::ShareKeeper,
            self.fingerprint,
            secrecy::ExposeSecret::expose_secret(&self.sk_config.handshake_secret).as_bytes(),
            PeerKind::TallyServer,
            &mut rng,
        )
        .await
        .map_err(|e| PrivcountError::new(ErrorKind::BadHandshake, e.to_string()))?;

        self.run_round_over(&mut session, &mut rng).await
    }

    async fn run_round_over<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        session: &mut PeerSession<S>,
        rng: &mut (impl rand::RngCore + rand::CryptoRng),
    ) -> Result<RoundOutcome, PrivcountError> {
        let config: RoundConfig = session
            .expect("RoundConfig", |m| match m {
                Message::RoundConfig { config } => Ok(config),
                other => Err(other),
            })
            .await
            .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?;
        let content_hash = config.content_hash();

        if let Err(reason) = self.policy.evaluate(&config) {
            session
                .send(Message::ConfigAck {
                    config_hash: content_hash,
                    accept: false,
                    reason: Some(reason.clone()),
                })
                .await
                .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?;
            return Ok(RoundOutcome::Rejected { reason });
        }

        session
            .send(Message::ConfigAck {
                config_hash: content_hash,
                accept: true,
                reason: None,
            })
            .await
            .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?;

        let mut seeds: BTreeMap<Fingerprint, Seed> = BTreeMap::new();
        loop {
            match session
                .recv()
                .await
                .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?
            {
                Message::Seed {
                    from_dc,
                    encrypted_seed,
                    ..
                } => {
                    if seeds.contains_key(&from_dc) {
                        let reason = format!("duplicate seed from {from_dc}");
                        warn!(%from_dc, "refusing round: duplicate seed");
                        return Ok(RoundOutcome::Rejected { reason });
                    }
                    let seed = rsa_seed::unwrap_seed(&encrypted_seed, &self.rsa_private_key)
                        .map_err(|_| PrivcountError::new(ErrorKind::SeedExchangeFailed, "could not decrypt seed"))?;
                    seeds.insert(from_dc, seed);
                }
                Message::Start => continue,
                Message::Stop => break,
                other => {
                    return Err(PrivcountError::new(
                        ErrorKind::ProtocolViolation,
                        format!("unexpected message while collecting seeds: {}", other.kind_name()),
                    ))
                }
            }
        }

        let ring = Ring::from_hex(&config.prime_modulus_hex)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let seed_values: Vec<Seed> = seeds.into_values().collect();
        let blinding_map = counter_table::initial_blinding_map(&config.counters.counters, &seed_values, &ring)
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;

        let key = aead::generate_key(rng);
        let sealed = aead::seal_shares(&blinding_map, &key, content_hash.to_string().as_bytes(), rng)
            .map_err(|e| PrivcountError::new(ErrorKind::CryptoFailure, e.to_string()))?;
        let wrapped_key = rsa_seed::wrap_seed(&Seed::from_bytes(key), &self.ts_public_key, rng)
            .map_err(|e| PrivcountError::new(ErrorKind::CryptoFailure, e.to_string()))?;

        session
            .send(Message::ShareSubmit {
                sealed_shares: sealed.ciphertext,
                aead_nonce: sealed.nonce,
                wrapped_key,
            })
            .await
            .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?;

        self.policy.record(&config);
        info!(round_id = %config.round_id, dcs = seed_values.len(), "submitted blinding shares");
        Ok(RoundOutcome::Submitted)
    }
}

fn fingerprint_of(public_key: &RsaPublicKey) -> Result<Fingerprint, PrivcountError> {
    use rsa::pkcs8::EncodePublicKey;
    let der = public_key
        .to_public_key_der()
        .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
    Ok(Fingerprint::of_der(der.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use privcount_proto::PeerSession;
    use privcount_types::counter::{Counter, CounterShape, CounterTable, EventSubscription};
    use privcount_types::round::{NoisePolicy, RoundId, Thresholds, Timing};
    use privcount_types::share::ShareMap;
    use rand::SeedableRng;
    use std::time::Duration;

    fn scalar_counter(name: &str) -> Counter {
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
            sensitivity: 1.0,
            expected_value: 0.0,
            sigma: None,
        }
    }

    fn test_config() -> RoundConfig {
        RoundConfig {
            round_id: RoundId(1),
            start_after: None,
            counters: CounterTable {
                counters: vec![scalar_counter("E")],
            },
            thresholds: Thresholds {
                dc_threshold: 1,
                sk_threshold: 1,
            },
            timing: Timing {
                collect_period: Duration::from_secs(1),
                checkin_period: Duration::from_secs(1),
                event_period: Duration::from_secs(1),
                delay_period: Duration::from_secs(1),
                start_timeout: Duration::from_secs(1),
                submission_timeout: Duration::from_secs(1),
            },
            noise: NoisePolicy {
                epsilon: 1.0,
                delta: 1e-6,
                sigma_decrease_tolerance: 0.0,
                always_delay: false,
            },
            share_keepers: vec![],
            event_subscription: vec![],
            circuit_sample_rate: 1.0,
            max_cell_events_per_circuit: 0,
            rotate_period: Duration::from_secs(3600),
            continue_count: None,
            prime_modulus_hex: "f".repeat(130),
        }
    }

    /// Drives a Share Keeper against a scripted fake Tally Server over an
    /// in-memory duplex pipe: sends the round config, a single DC's seed,
    /// and `Stop`, then checks the submitted share is the negation of
    /// that seed's keystream contribution.
    #[tokio::test]
    async fn submits_the_negated_keystream_for_one_dc() {
        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(1);
        let sk_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let ts_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let ts_public_key = RsaPublicKey::from(&ts_key);

        let mut sk = ShareKeeper {
            sk_config: ShareKeeperConfig {
                ts_addr: "127.0.0.1:0".parse().unwrap(),
                tls_cert_path: "unused".into(),
                tls_key_path: "unused".into(),
                tls_trusted_ca_path: "unused".into(),
                handshake_secret: secrecy::SecretString::from("unused".to_string()),
                rsa_private_key_path: "unused".into(),
                ts_rsa_public_key_path: "unused".into(),
                sigma_decrease_tolerance: 0.0,
                handshake_timeout: Duration::from_secs(1),
            },
            fingerprint: fingerprint_of(&RsaPublicKey::from(&sk_key)).unwrap(),
            ts_public_key,
            rsa_private_key: sk_key,
            policy: LocalPolicy::new(0.0),
        };

        let (fake_ts, sk_end) = tokio::io::duplex(1 << 16);
        let mut fake_ts = PeerSession::new(fake_ts);
        let mut sk_session = PeerSession::new(sk_end);

        let config = test_config();
        let dc_fp = Fingerprint::of_der(b"dc1");
        let dc_seed = privcount_core::keystream::generate_seed(&mut rng);
        let ring = Ring::from_hex(&config.prime_modulus_hex).unwrap();
        let expected_stream = privcount_core::keystream::derive(&dc_seed, "E", 0, &ring);
        let wrapped_seed = rsa_seed::wrap_seed(
            &Seed::from_bytes(*dc_seed.reveal()),
            &RsaPublicKey::from(&sk.rsa_private_key),
            &mut rng,
        )
        .unwrap();

        let driver = tokio::spawn(async move {
            fake_ts
                .send(Message::RoundConfig {
                    config: config.clone(),
                })
                .await
                .unwrap();
            let ack = fake_ts
                .expect("ConfigAck", |m| match m {
                    Message::ConfigAck { accept, .. } => Ok(accept),
                    other => Err(other),
                })
                .await
                .unwrap();
            assert!(ack);
            fake_ts
                .send(Message::Seed {
                    from_dc: dc_fp,
                    to_sk: Fingerprint::of_der(b"sk"),
                    encrypted_seed: wrapped_seed,
                })
                .await
                .unwrap();
            fake_ts.send(Message::Stop).await.unwrap();
            let (sealed_shares, aead_nonce, wrapped_key) = fake_ts
                .expect("ShareSubmit", |m| match m {
                    Message::ShareSubmit {
                        sealed_shares,
                        aead_nonce,
                        wrapped_key,
                    } => Ok((sealed_shares, aead_nonce, wrapped_key)),
                    other => Err(other),
                })
                .await
                .unwrap();
            (sealed_shares, aead_nonce, wrapped_key, config)
        });

        let mut rng2 = rand_chacha::ChaCha20Rng::seed_from_u64(2);
        let outcome = sk.run_round_over(&mut sk_session, &mut rng2).await.unwrap();
        assert_eq!(outcome, RoundOutcome::Submitted);

        let (sealed_shares, aead_nonce, wrapped_key, config) = driver.await.unwrap();
        let submission_key = rsa_seed::unwrap_seed(&wrapped_key, &ts_key).unwrap();
        let mut key = [0u8; aead::KEY_BYTES];
        key.copy_from_slice(submission_key.reveal());
        let sealed = aead::SealedShares {
            ciphertext: sealed_shares,
            nonce: aead_nonce,
        };
        let opened: ShareMap =
            aead::open_shares(&sealed, &key, config.content_hash().to_string().as_bytes()).unwrap();
        let negated = ring.from_share_value(opened.get("E", 0).unwrap());
        assert_eq!(ring.add(&negated, &expected_stream), ring.zero());
    }
}
