//! Per-circuit sampling and per-counter event caps, applied before an
//! event is allowed to reach [`crate::counters::CounterState`].

use std::collections::BTreeMap;

use privcount_types::counter::EventCap;
use rand::Rng;

/// Decides, once per circuit and stably for that circuit's lifetime,
/// whether it contributes to any counter.
#[derive(Debug, Default)]
pub struct CircuitSampler {
    rate: f64,
    decisions: BTreeMap<String, bool>,
}

impl CircuitSampler {
    /// Creates a sampler admitting circuits with probability `rate`.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            decisions: BTreeMap::new(),
        }
    }

    /// Returns whether `circuit_id` is sampled in, drawing and caching
    /// the decision the first time this circuit is seen.
    pub fn sampled(&mut self, circuit_id: &str, rng: &mut impl Rng) -> bool {
        *self
            .decisions
            .entry(circuit_id.to_string())
            .or_insert_with(|| rng.r#gen::<f64>() < self.rate)
    }

    /// Drops the cached decision for a closed circuit, bounding memory to
    /// currently open circuits.
    pub fn forget(&mut self, circuit_id: &str) {
        self.decisions.remove(circuit_id);
    }

    /// Number of circuits with a cached sampling decision.
    pub fn open_circuit_count(&self) -> usize {
        self.decisions.len()
    }
}

/// Tracks how many capped events have landed for each counter this
/// round: once a counter's cap is reached, further events for it are
/// refused rather than incrementing past the configured maximum.
#[derive(Debug, Default)]
pub struct CapTracker {
    counts: BTreeMap<String, u64>,
}

impl CapTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `counter_name` may still increment under `cap`,
    /// recording the attempt either way.
    pub fn allow(&mut self, counter_name: &str, cap: EventCap) -> bool {
        let count = self.counts.entry(counter_name.to_string()).or_insert(0);
        if *count >= cap.max_events {
            false
        } else {
            *count += 1;
            true
        }
    }
}
