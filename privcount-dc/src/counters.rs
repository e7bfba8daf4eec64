//! This process's local, blinded view of every counter: seeded at round
//! start from the paired Share Keepers' keystreams, then incremented,
//! one matching event at a time, until `Stop`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use num_bigint::BigUint;
use privcount_core::counter_table;
use privcount_core::field::{Ring, RingError};
use privcount_types::counter::Counter;
use privcount_types::share::{Seed, ShareMap};

use rand::Rng;

use crate::entity_tracker::EntityTracker;
use crate::event_source::RawEvent;
use crate::metrics_ids::{METRICS_ID_DC_CAP_OVERFLOW, METRICS_ID_DC_EVENTS_APPLIED};
use crate::sampling::{CapTracker, CircuitSampler};

/// The running, blinded state of every counter this process holds for
/// the current round.
pub struct CounterState {
    ring: Ring,
    counters: Vec<Counter>,
    values: BTreeMap<(String, u64), BigUint>,
    caps: CapTracker,
    cell_circuit_counts: BTreeMap<String, u64>,
    max_cell_events_per_circuit: u64,
    entities: EntityTracker,
    circuit_sampling: CircuitSampler,
}

impl CounterState {
    /// Seeds every counter/bin to its blinded starting value from the
    /// keystreams shared with `seeds`, one per paired Share Keeper.
    pub fn initialize(
        counters: Vec<Counter>,
        seeds: &[Seed],
        ring: Ring,
        max_cell_events_per_circuit: u64,
        rotate_period: Duration,
        circuit_sample_rate: f64,
    ) -> Result<Self, RingError> {
        let starting = counter_table::initial_share_map(&counters, seeds, &ring)?;
        let mut values = BTreeMap::new();
        for ((name, bin), value) in starting.iter() {
            values.insert((name.clone(), *bin), ring.from_share_value(*value));
        }
        Ok(Self {
            ring,
            counters,
            values,
            caps: CapTracker::new(),
            cell_circuit_counts: BTreeMap::new(),
            max_cell_events_per_circuit,
            entities: EntityTracker::new(rotate_period),
            circuit_sampling: CircuitSampler::new(circuit_sample_rate),
        })
    }

    /// Applies one observed event against every counter subscribed to
    /// its event type, respecting predicates, bin routing, and caps.
    /// An event never matching any counter is simply a no-op; an event
    /// matching several counters increments each independently.
    ///
    /// An event carrying a `circuit_id` field is first weighed against
    /// this round's circuit sampling rate: a circuit sampled out
    /// contributes to nothing, for the rest of its lifetime.
    ///
    /// A counter whose subscription names an `entity_field` never
    /// increments directly: the event's weight accumulates into that
    /// entity's running total, which is only folded into the counter
    /// when the entity closes (see [`Self::apply_event`]'s `end=true`
    /// handling) or is force-expired by [`Self::expire_entities`].
    pub fn apply_event(&mut self, event: &RawEvent, rng: &mut impl Rng) {
        if let Some(circuit_id) = event.fields.get("circuit_id") {
            if !self.circuit_sampling.sampled(circuit_id, rng) {
                if event.fields.get("end").map(String::as_str) == Some("true") {
                    self.circuit_sampling.forget(circuit_id);
                }
                return;
            }
        }
        let mut applied = false;
        for counter in self.counters.clone() {
            if !counter
                .subscription
                .event_types
                .iter()
                .any(|t| t == &event.event_type)
            {
                continue;
            }
            if let Some(predicate) = &counter.subscription.predicate {
                if !predicate_matches(predicate, &event.fields) {
                    continue;
                }
            }
            if event.event_type == "Cell" && self.max_cell_events_per_circuit > 0 {
                if let Some(circuit_id) = event.fields.get("circuit_id") {
                    let count = self
                        .cell_circuit_counts
                        .entry(circuit_id.clone())
                        .or_insert(0);
                    if *count >= self.max_cell_events_per_circuit {
                        continue;
                    }
                    *count += 1;
                }
            }
            if let Some(cap) = counter.subscription.cap {
                if !self.caps.allow(&counter.name, cap) {
                    metrics::counter!(METRICS_ID_DC_CAP_OVERFLOW).increment(1);
                    continue;
                }
            }

            let weight = counter
                .subscription
                .increment_field
                .as_ref()
                .and_then(|field| event.fields.get(field))
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(1.0);

            if let Some(entity_field) = &counter.subscription.entity_field {
                if let Some(entity_id) = event.fields.get(entity_field) {
                    self.entities
                        .accumulate(entity_id, &counter.name, weight, Instant::now());
                    if event.fields.get("end").map(String::as_str) == Some("true") {
                        if let Some(totals) = self.entities.close(entity_id) {
                            self.fold_entity_totals(&totals);
                        }
                    }
                    applied = true;
                }
                continue;
            }

            let bin_value = counter
                .subscription
                .bin_field
                .as_ref()
                .and_then(|field| event.fields.get(field))
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0);
            let bin = counter_table::bin_index(&counter, bin_value) as u64;

            let increment = BigUint::from(weight.max(0.0).round() as u64);

            let key = (counter.name.clone(), bin);
            let current = self.values.entry(key).or_insert_with(|| self.ring.zero());
            *current = self.ring.add(current, &increment);
            applied = true;
        }
        if applied {
            metrics::counter!(METRICS_ID_DC_EVENTS_APPLIED).increment(1);
        }
        if let (Some(circuit_id), Some("true")) =
            (event.fields.get("circuit_id"), event.fields.get("end").map(String::as_str))
        {
            self.circuit_sampling.forget(circuit_id);
        }
    }

    /// Force-closes every entity that has outlived twice the round's
    /// rotation period, folding its accumulated totals into counters the
    /// same way a natural close does. Called periodically so a leaked
    /// entity (a circuit that never reports closing) cannot hold its
    /// identifying fields in memory indefinitely.
    pub fn expire_entities(&mut self) {
        let expired = self.entities.expire(Instant::now());
        for (_, totals) in expired {
            self.fold_entity_totals(&totals);
        }
    }

    /// Folds one closed entity's accumulated per-counter totals into the
    /// counters that declared `entity_field`: each total places one
    /// contribution into the bin its accumulated value falls in.
    fn fold_entity_totals(&mut self, totals: &BTreeMap<String, f64>) {
        for (counter_name, total) in totals {
            let Some(counter) = self.counters.iter().find(|c| &c.name == counter_name) else {
                continue;
            };
            let bin = counter_table::bin_index(counter, *total) as u64;
            let key = (counter.name.clone(), bin);
            let current = self.values.entry(key).or_insert_with(|| self.ring.zero());
            *current = self.ring.add(current, &BigUint::from(1u32));
        }
    }

    /// Encodes every counter/bin's current value as a wire-ready share
    /// map, for sealing and submission at round end.
    pub fn into_share_map(self) -> Result<ShareMap, RingError> {
        let mut map = ShareMap::new();
        for ((name, bin), value) in &self.values {
            map.set(name, *bin, self.ring.to_share_value(value)?);
        }
        Ok(map)
    }
}

/// Evaluates a minimal `&&`-separated list of `field=value` equality
/// clauses against an event's fields. A clause naming a field the event
/// does not carry never matches.
fn predicate_matches(predicate: &str, fields: &BTreeMap<String, String>) -> bool {
    predicate.split("&&").all(|clause| {
        let clause = clause.trim();
        match clause.split_once('=') {
            Some((key, value)) => fields
                .get(key.trim())
                .is_some_and(|v| v == value.trim()),
            None => true,
        }
    })
}
