//! Coordinates a single round: quorum gating, share collection,
//! reconstruction, noising, and outcome assembly.

use std::collections::{BTreeMap, BTreeSet};

use privcount_core::field::{Ring, RingError};
use privcount_core::noise;
use privcount_types::counter::CounterShape;
use privcount_types::error::{ErrorKind, PrivcountError};
use privcount_types::fingerprint::{Fingerprint, PeerKind};
use privcount_types::outcome::{BinResult, Context, CounterResult, Outcome};
use privcount_types::round::RoundConfig;
use privcount_types::share::ShareMap;
use rand::Rng;

use crate::sigma_alloc::{self, SigmaTable};
use crate::state_machine::{IllegalTransition, RoundLifecycle, RoundState};

/// Coordinates one round from distribution through publication.
pub struct Coordinator {
    config: RoundConfig,
    ring: Ring,
    lifecycle: RoundLifecycle,
    acked_dcs: BTreeSet<Fingerprint>,
    acked_sks: BTreeSet<Fingerprint>,
    dc_shares: BTreeMap<Fingerprint, ShareMap>,
    sk_shares: BTreeMap<Fingerprint, ShareMap>,
    start_time: Option<String>,
    stop_time: Option<String>,
}

impl Coordinator {
    /// Creates a coordinator for `config`, in the `Idle` state.
    pub fn new(config: RoundConfig) -> Result<Self, RingError> {
        let ring = Ring::from_hex(&config.prime_modulus_hex)?;
        Ok(Self {
            config,
            ring,
            lifecycle: RoundLifecycle::default(),
            acked_dcs: BTreeSet::new(),
            acked_sks: BTreeSet::new(),
            dc_shares: BTreeMap::new(),
            sk_shares: BTreeMap::new(),
            start_time: None,
            stop_time: None,
        })
    }

    /// The round's distributed configuration.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// The round's current lifecycle state.
    pub fn state(&self) -> RoundState {
        self.lifecycle.state()
    }

    /// Moves the round from `Idle` to `Starting`, after the configuration
    /// has been sent to every peer.
    pub fn begin_distribution(&mut self) -> Result<(), IllegalTransition> {
        self.lifecycle.advance(RoundState::Starting)
    }

    /// Records one peer's acknowledgement of the round configuration.
    pub fn record_ack(&mut self, kind: PeerKind, fingerprint: Fingerprint, accept: bool) {
        if !accept {
            return;
        }
        match kind {
            PeerKind::DataCollector => {
                self.acked_dcs.insert(fingerprint);
            }
            PeerKind::ShareKeeper => {
                self.acked_sks.insert(fingerprint);
            }
            PeerKind::TallyServer => {}
        }
    }

    /// Whether enough peers have acknowledged to proceed past `Starting`.
    pub fn quorum_met(&self) -> bool {
        self.acked_dcs.len() >= self.config.thresholds.dc_threshold
            && self.acked_sks.len() >= self.config.thresholds.sk_threshold
    }

    /// Starts counting: `Starting` -> `Collecting`, recording `now` as the
    /// round's start time. Fails if quorum has not been met.
    pub fn start_collecting(&mut self, now: String) -> Result<(), PrivcountError> {
        if !self.quorum_met() {
            return Err(PrivcountError::new(
                ErrorKind::QuorumNotMet,
                format!(
                    "only {} of {} DCs and {} of {} SKs acknowledged",
                    self.acked_dcs.len(),
                    self.config.thresholds.dc_threshold,
                    self.acked_sks.len(),
                    self.config.thresholds.sk_threshold
                ),
            ));
        }
        self.lifecycle
            .advance(RoundState::Collecting)
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;
        self.start_time = Some(now);
        Ok(())
    }

    /// Ends counting: `Collecting` -> `Stopping`, recording `now` as the
    /// round's stop time.
    pub fn stop_collecting(&mut self, now: String) -> Result<(), IllegalTransition> {
        self.lifecycle.advance(RoundState::Stopping)?;
        self.stop_time = Some(now);
        Ok(())
    }

    /// Records a peer's submitted shares.
    pub fn submit_shares(&mut self, kind: PeerKind, fingerprint: Fingerprint, shares: ShareMap) {
        match kind {
            PeerKind::DataCollector => {
                self.dc_shares.insert(fingerprint, shares);
            }
            PeerKind::ShareKeeper => {
                self.sk_shares.insert(fingerprint, shares);
            }
            PeerKind::TallyServer => {}
        }
    }

    /// Whether every acknowledged DC and SK has submitted its shares.
    pub fn all_shares_in(&self) -> bool {
        self.acked_dcs
            .iter()
            .all(|fp| self.dc_shares.contains_key(fp))
            && self.acked_sks.iter().all(|fp| self.sk_shares.contains_key(fp))
    }

    /// Reconstructs, noises, and assembles the round's outcome.
    /// `Stopping` -> `Tallying` -> `Published`.
    pub fn tally(
        &mut self,
        sigma_policy: &crate::sigma_alloc::SigmaTable,
        software_version: &str,
        publish_time: String,
        rng: &mut impl Rng,
    ) -> Result<Outcome, PrivcountError> {
        self.lifecycle
            .advance(RoundState::Tallying)
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;
        if !self.all_shares_in() {
            let reason = "not all acknowledged peers submitted shares".to_string();
            self.lifecycle
                .abort(PrivcountError::new(ErrorKind::MissingShares, reason.clone()));
            return Err(PrivcountError::new(ErrorKind::MissingShares, reason));
        }

        let mut validity_flagged = false;
        let mut tally = BTreeMap::new();
        for counter in &self.config.counters.counters {
            let sigma = sigma_policy.get(&counter.name).copied();
            let mut bins = Vec::with_capacity(counter.bin_count());
            for bin_index in 0..counter.bin_count() as u64 {
                let reconstructed = self.reconstruct_bin(&counter.name, bin_index);
                let signed = self.ring.to_signed(&reconstructed);
                if counter.is_zero_counter() && signed != num_bigint::BigInt::from(0) {
                    validity_flagged = true;
                }
                let noised = match sigma {
                    Some(s) => noise::apply_noise(&signed, s, rng),
                    None => signed,
                };
                let (lo, hi) = bin_edges(counter, bin_index as usize);
                bins.push(BinResult {
                    lo,
                    hi,
                    count: noise::to_reportable(&noised),
                });
            }
            tally.insert(
                counter.name.clone(),
                CounterResult {
                    bins,
                    sigma: sigma.unwrap_or(0.0),
                    sensitivity: counter.sensitivity,
                    epsilon: if sigma.is_some() {
                        self.config.noise.epsilon
                    } else {
                        0.0
                    },
                    delta: self.config.noise.delta,
                },
            );
        }

        let context = Context {
            round_id: self.config.round_id,
            round_config_hash: self.config.content_hash(),
            start_time: self.start_time.clone().unwrap_or_default(),
            stop_time: self.stop_time.clone().unwrap_or_default(),
            publish_time,
            participating_dcs: self.acked_dcs.iter().copied().collect(),
            participating_sks: self.acked_sks.iter().copied().collect(),
            protocol_version: privcount_types::PROTOCOL_VERSION,
            software_version: software_version.to_string(),
            noise_sampled_by: "tally-server".to_string(),
            validity_flagged,
        };

        self.lifecycle
            .advance(RoundState::Published)
            .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;

        Ok(Outcome { tally, context })
    }

    /// Aborts the round regardless of its current state.
    pub fn abort(&mut self, reason: PrivcountError) {
        self.lifecycle.abort(reason);
    }

    /// Allocates sigma across the round's counters from the round's
    /// noise policy. The Tally Server is the sole noise sampler under
    /// this design, so sigma depends only on each counter's sensitivity
    /// and the round's epsilon/delta, never on which or how many DCs
    /// happened to acknowledge.
    pub fn allocate_sigma(&self) -> SigmaTable {
        sigma_alloc::allocate(&self.config.counters, &self.config.noise)
    }

    fn reconstruct_bin(&self, counter_name: &str, bin_index: u64) -> num_bigint::BigUint {
        let dc_sum = self
            .dc_shares
            .values()
            .filter_map(|m| m.get(counter_name, bin_index))
            .fold(self.ring.zero(), |acc, v| {
                self.ring.add(&acc, &self.ring.from_share_value(v))
            });
        self.sk_shares
            .values()
            .filter_map(|m| m.get(counter_name, bin_index))
            .fold(dc_sum, |acc, v| {
                self.ring.add(&acc, &self.ring.from_share_value(v))
            })
    }
}

fn bin_edges(counter: &privcount_types::counter::Counter, index: usize) -> (String, String) {
    match &counter.shape {
        CounterShape::Scalar => ("-inf".to_string(), "+inf".to_string()),
        CounterShape::Histogram { bins } => {
            let bin = &bins[index];
            (bin.lo.to_string(), bin.hi.to_string())
        }
    }
}
