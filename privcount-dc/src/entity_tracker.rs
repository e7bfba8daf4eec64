//! Per-entity (per-circuit, per-stream, ...) accumulation state that is
//! flushed into counters only when the entity closes, so a counter never
//! observes a half-finished entity's contribution twice.
//!
//! An entity that never closes (a leaked circuit, a crashed relay) is
//! forced shut after twice its rotation period, bounding how long its
//! state can linger.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Open accumulation state for one entity, keyed by whatever identifier
/// the event stream uses (a circuit id, most commonly).
#[derive(Debug, Clone)]
struct EntityRecord {
    opened_at: Instant,
    accumulators: BTreeMap<String, f64>,
}

/// Tracks every currently open entity and forces a close once it has
/// outlived `2 * rotate_period`.
#[derive(Debug)]
pub struct EntityTracker {
    rotate_period: Duration,
    entities: BTreeMap<String, EntityRecord>,
}

impl EntityTracker {
    /// Creates a tracker that force-closes entities older than
    /// `2 * rotate_period`.
    pub fn new(rotate_period: Duration) -> Self {
        Self {
            rotate_period,
            entities: BTreeMap::new(),
        }
    }

    /// Adds `amount` to `counter_name`'s running total for `entity_id`,
    /// opening the entity if this is its first observation.
    pub fn accumulate(&mut self, entity_id: &str, counter_name: &str, amount: f64, now: Instant) {
        let record = self.entities.entry(entity_id.to_string()).or_insert_with(|| EntityRecord {
            opened_at: now,
            accumulators: BTreeMap::new(),
        });
        *record.accumulators.entry(counter_name.to_string()).or_insert(0.0) += amount;
    }

    /// Closes `entity_id`, returning its accumulated per-counter totals
    /// for the caller to fold into the round's counters. Returns `None`
    /// if the entity was never opened.
    pub fn close(&mut self, entity_id: &str) -> Option<BTreeMap<String, f64>> {
        self.entities.remove(entity_id).map(|r| r.accumulators)
    }

    /// Force-closes every entity open for more than `2 * rotate_period`
    /// as of `now`, returning their accumulated totals keyed by entity
    /// id. Called periodically so a leaked entity cannot hold state
    /// indefinitely.
    pub fn expire(&mut self, now: Instant) -> Vec<(String, BTreeMap<String, f64>)> {
        let cutoff = self.rotate_period * 2;
        let stale: Vec<String> = self
            .entities
            .iter()
            .filter(|(_, r)| now.duration_since(r.opened_at) >= cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.close(&id).map(|totals| (id, totals)))
            .collect()
    }

    /// Number of currently open entities.
    pub fn open_count(&self) -> usize {
        self.entities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_returns_accumulated_totals() {
        let mut tracker = EntityTracker::new(Duration::from_secs(60));
        let now = Instant::now();
        tracker.accumulate("circuit-1", "BytesTransferred", 10.0, now);
        tracker.accumulate("circuit-1", "BytesTransferred", 5.0, now);
        let totals = tracker.close("circuit-1").unwrap();
        assert_eq!(totals.get("BytesTransferred").copied(), Some(15.0));
        assert!(tracker.close("circuit-1").is_none());
    }

    #[test]
    fn expire_force_closes_entities_past_twice_rotate_period() {
        let mut tracker = EntityTracker::new(Duration::from_millis(1));
        let opened = Instant::now();
        tracker.accumulate("circuit-1", "C", 1.0, opened);
        let later = opened + Duration::from_millis(10);
        let expired = tracker.expire(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "circuit-1");
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn expire_leaves_fresh_entities_open() {
        let mut tracker = EntityTracker::new(Duration::from_secs(3600));
        let now = Instant::now();
        tracker.accumulate("circuit-1", "C", 1.0, now);
        assert!(tracker.expire(now).is_empty());
        assert_eq!(tracker.open_count(), 1);
    }
}
