//! The Data Collector's side of one round: handshake with the Tally
//! Server, exchange a fresh seed with every paired Share Keeper, observe
//! events from `Start` to `Stop`, and submit this round's shares.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

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
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::info;

use crate::config::DataCollectorConfig;
use crate::counters::CounterState;
use crate::event_source::{EventSource, SourceAuth};

/// What became of one round this Data Collector was offered.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The round was accepted and this Data Collector submitted its
    /// counter shares.
    Submitted,
    /// The round configuration was refused before counting began.
    Rejected {
        /// The refusal reason reported to the Tally Server.
        reason: String,
    },
}

/// A Data Collector's long-lived identity and the Share Keeper public
/// keys it may pair with.
pub struct DataCollector {
    dc_config: DataCollectorConfig,
    fingerprint: Fingerprint,
    sk_public_keys: BTreeMap<Fingerprint, RsaPublicKey>,
    ts_public_key: RsaPublicKey,
}

impl DataCollector {
    /// Loads this Data Collector's RSA identity, every Share Keeper
    /// public key found in `sk_public_keys_dir`, and the Tally Server's
    /// public key. Does not open a connection yet.
    ///
    /// Unlike a Share Keeper, a Data Collector never decrypts anything
    /// under its own key, so only its fingerprint is retained once
    /// loaded.
    pub fn bind(dc_config: DataCollectorConfig) -> Result<Self, PrivcountError> {
        install_crypto_provider();
        dc_config
            .validate()
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e))?;
        let rsa_private_key = RsaPrivateKey::read_pkcs8_pem_file(&dc_config.rsa_private_key_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let fingerprint = fingerprint_of(&RsaPublicKey::from(&rsa_private_key))?;
        let sk_public_keys = load_sk_public_keys(&dc_config.sk_public_keys_dir)?;
        let ts_public_key = RsaPublicKey::read_public_key_pem_file(&dc_config.ts_rsa_public_key_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        Ok(Self {
            dc_config,
            fingerprint,
            sk_public_keys,
            ts_public_key,
        })
    }

    /// Connects to the Tally Server and runs exactly one round:
    /// handshake, round configuration acceptance, seed exchange, event
    /// counting, and share submission.
    pub async fn run_round(&mut self) -> Result<RoundOutcome, PrivcountError> {
        let trusted_ca = load_certs(&self.dc_config.tls_trusted_ca_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let cert_chain = load_certs(&self.dc_config.tls_cert_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let key = load_private_key(&self.dc_config.tls_key_path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let connector = build_connector(cert_chain, key, trusted_ca)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;

        let stream = TcpStream::connect(self.dc_config.ts_addr)
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
            PeerKind::DataCollector,
            self.fingerprint,
            secrecy::ExposeSecret::expose_secret(&self.dc_config.handshake_secret).as_bytes(),
            PeerKind::TallyServer,
            &mut rng,
        )
        .await
        .map_err(|e| PrivcountError::new(ErrorKind::BadHandshake, e.to_string()))?;

        let mut events = self.open_event_source()?;
        self.run_round_over(&mut session, &mut rng, &mut events).await
    }

    /// Opens the configured local event source, resolving whichever
    /// authentication method this process was configured with.
    fn open_event_source(&self) -> Result<EventSource, PrivcountError> {
        let auth = match (&self.dc_config.event_source_password, &self.dc_config.event_source_cookie_path) {
            (Some(password), _) => SourceAuth::Password(secrecy::SecretString::from(
                secrecy::ExposeSecret::expose_secret(password).to_owned(),
            )),
            (None, Some(cookie_path)) => SourceAuth::CookieFile(cookie_path.clone()),
            (None, None) => {
                return Err(PrivcountError::new(
                    ErrorKind::ConfigInvalid,
                    "no event source authentication configured",
                ))
            }
        };
        Ok(EventSource::connect(
            self.dc_config.event_source_addr,
            auth,
            self.dc_config.event_source_reconnect_interval,
            self.dc_config.event_queue_capacity,
        ))
    }

    async fn run_round_over<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        session: &mut PeerSession<S>,
        rng: &mut (impl rand::RngCore + rand::CryptoRng),
        events: &mut EventSource,
    ) -> Result<RoundOutcome, PrivcountError> {
        let config: RoundConfig = session
            .expect("RoundConfig", |m| match m {
                Message::RoundConfig { config } => Ok(config),
                other => Err(other),
            })
            .await
            .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?;
        let content_hash = config.content_hash();

        if let Err(reason) = self.evaluate_local(&config) {
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

        let paired_sks = self.paired_share_keepers(&config);

        session
            .send(Message::ConfigAck {
                config_hash: content_hash,
                accept: true,
                reason: None,
            })
            .await
            .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?;

        let mut seeds = Vec::with_capacity(paired_sks.len());
        for (sk_fingerprint, sk_public_key) in &paired_sks {
            let seed = privcount_core::keystream::generate_seed(rng);
            let encrypted_seed = rsa_seed::wrap_seed(&seed, sk_public_key, rng)
                .map_err(|e| PrivcountError::new(ErrorKind::CryptoFailure, e.to_string()))?;
            session
                .send(Message::Seed {
                    from_dc: self.fingerprint,
                    to_sk: *sk_fingerprint,
                    encrypted_seed,
                })
                .await
                .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?;
            seeds.push(seed);
        }

        loop {
            match session
                .recv()
                .await
                .map_err(|e| PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string()))?
            {
                Message::Start => break,
                Message::Status { .. } => continue,
                other => {
                    return Err(PrivcountError::new(
                        ErrorKind::ProtocolViolation,
                        format!("unexpected message before Start: {}", other.kind_name()),
                    ))
                }
            }
        }

        let ring = Ring::from_hex(&config.prime_modulus_hex)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let mut counters = CounterState::initialize(
            config.counters.counters.clone(),
            &seeds,
            ring.clone(),
            config.max_cell_events_per_circuit,
            config.rotate_period,
            config.circuit_sample_rate,
        )
        .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;

        let mut rotate_tick = tokio::time::interval(config.rotate_period);
        rotate_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                inbound = session.recv() => {
                    match inbound {
                        Ok(Message::Stop) => break,
                        Ok(Message::Status { .. }) => continue,
                        Ok(other) => {
                            return Err(PrivcountError::new(
                                ErrorKind::ProtocolViolation,
                                format!("unexpected message while counting: {}", other.kind_name()),
                            ))
                        }
                        Err(e) => return Err(PrivcountError::new(ErrorKind::ProtocolViolation, e.to_string())),
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => counters.apply_event(&event, rng),
                        None => {
                            return Err(PrivcountError::new(
                                ErrorKind::EventOverflow,
                                "event source queue overflowed during counting",
                            ))
                        }
                    }
                }
                _ = rotate_tick.tick() => counters.expire_entities(),
            }
        }

        let share_map = counters
            .into_share_map()
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;

        let key = aead::generate_key(rng);
        let sealed = aead::seal_shares(&share_map, &key, content_hash.to_string().as_bytes(), rng)
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

        info!(round_id = %config.round_id, sks = paired_sks.len(), "submitted counter shares");
        Ok(RoundOutcome::Submitted)
    }

    /// Validation gates applied before anything is shared with the
    /// round: the counter table itself, the supported event types, and
    /// the number of Share Keepers this process is paired with.
    fn evaluate_local(&self, config: &RoundConfig) -> Result<(), String> {
        config.counters.validate()?;
        for required in &config.event_subscription {
            if !self.dc_config.supported_event_types.iter().any(|t| t == required) {
                return Err(format!("cannot supply required event type {required}"));
            }
        }
        let paired = self.paired_share_keepers(config);
        if paired.len() < config.thresholds.sk_threshold {
            return Err(format!(
                "only {} of {} required share keepers are known",
                paired.len(),
                config.thresholds.sk_threshold
            ));
        }
        Ok(())
    }

    /// Every known Share Keeper public key that `config.share_keepers`
    /// allows pairing with.
    fn paired_share_keepers(&self, config: &RoundConfig) -> Vec<(Fingerprint, RsaPublicKey)> {
        self.sk_public_keys
            .iter()
            .filter(|(fp, _)| config.share_keepers.iter().any(|pattern| pattern.matches(**fp)))
            .map(|(fp, key)| (*fp, key.clone()))
            .collect()
    }
}

fn fingerprint_of(public_key: &RsaPublicKey) -> Result<Fingerprint, PrivcountError> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
    Ok(Fingerprint::of_der(der.as_bytes()))
}

fn load_sk_public_keys(dir: &Path) -> Result<BTreeMap<Fingerprint, RsaPublicKey>, PrivcountError> {
    let mut keys = BTreeMap::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pem") {
            continue;
        }
        let public_key = RsaPublicKey::read_public_key_pem_file(&path)
            .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, format!("{}: {e}", path.display())))?;
        let fingerprint = fingerprint_of(&public_key)?;
        keys.insert(fingerprint, public_key);
    }
    Ok(keys)
}
