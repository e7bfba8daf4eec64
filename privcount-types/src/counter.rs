//! The counter table data model.
//!
//! A counter table is *data*, not code: it is loaded from the round
//! configuration and declares, per counter, the bin edges, the event
//! subscription, and how observed fields map onto a bin index. Adding a
//! counter must never require a code change in this crate or in
//! `privcount-core`; only the table contents change.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One endpoint of a [`Bin`].
///
/// Histograms may start at `-inf` and end at `+inf`. Bins are half-open
/// `[lo, hi)`, with the final bin treated as closed only when its upper
/// edge is `+inf`. Since JSON has no literal infinity, edges serialize
/// as the strings `"-inf"`/`"+inf"` or as a plain finite number.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub enum Edge {
    /// Negative infinity; only valid as a bin's lower edge.
    NegInfinity,
    /// A finite boundary value.
    Finite(f64),
    /// Positive infinity; only valid as a bin's upper edge, and only on
    /// the last bin of a table (which is then treated as closed).
    PosInfinity,
}

impl Edge {
    /// Returns the finite value, or `f64::NEG_INFINITY`/`f64::INFINITY`
    /// for the infinite variants, for use in arithmetic comparisons.
    pub fn as_f64(self) -> f64 {
        match self {
            Edge::NegInfinity => f64::NEG_INFINITY,
            Edge::Finite(v) => v,
            Edge::PosInfinity => f64::INFINITY,
        }
    }

    /// Returns `true` for either infinite variant.
    pub fn is_infinite(self) -> bool {
        matches!(self, Edge::NegInfinity | Edge::PosInfinity)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::NegInfinity => f.write_str("-inf"),
            Edge::Finite(v) => write!(f, "{v}"),
            Edge::PosInfinity => f.write_str("+inf"),
        }
    }
}

impl Serialize for Edge {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Edge::NegInfinity => serializer.serialize_str("-inf"),
            Edge::PosInfinity => serializer.serialize_str("+inf"),
            Edge::Finite(v) => serializer.serialize_f64(*v),
        }
    }
}

impl<'de> Deserialize<'de> for Edge {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EdgeVisitor;
        impl serde::de::Visitor<'_> for EdgeVisitor {
            type Value = Edge;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a finite number, \"-inf\", or \"+inf\"")
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Edge, E> {
                Ok(Edge::Finite(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Edge, E> {
                Ok(Edge::Finite(v as f64))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Edge, E> {
                Ok(Edge::Finite(v as f64))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Edge, E> {
                match v {
                    "-inf" => Ok(Edge::NegInfinity),
                    "+inf" => Ok(Edge::PosInfinity),
                    other => Err(E::custom(format!("invalid bin edge: {other}"))),
                }
            }
        }
        deserializer.deserialize_any(EdgeVisitor)
    }
}

/// A half-open interval `[lo, hi)` into which observations are placed.
///
/// The final bin of a table may end at `+inf`, in which case it is
/// treated as closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    /// Inclusive lower edge.
    pub lo: Edge,
    /// Exclusive upper edge, unless it is `+inf` (then inclusive).
    pub hi: Edge,
}

impl Bin {
    /// Creates a new bin, panicking if `lo >= hi`.
    pub fn new(lo: Edge, hi: Edge) -> Self {
        assert!(lo.as_f64() < hi.as_f64(), "bin edges must be increasing");
        Self { lo, hi }
    }

    /// Returns `true` if `value` falls in this half-open interval, with
    /// the final-bin-closed-at-`+inf` rule applied.
    pub fn contains(&self, value: f64) -> bool {
        if value < self.lo.as_f64() {
            return false;
        }
        if self.hi == Edge::PosInfinity {
            value < self.hi.as_f64() || value.is_infinite()
        } else {
            value < self.hi.as_f64()
        }
    }
}

/// The shape of a counter: either a single scalar bin, or an ordered,
/// non-overlapping sequence of histogram bins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CounterShape {
    /// A scalar accumulator: one implicit bin covering the whole real
    /// line.
    Scalar,
    /// An ordered sequence of half-open bins partitioning a portion of
    /// the real line.
    Histogram {
        /// Bin boundaries, sorted by `lo` ascending, non-overlapping.
        bins: Vec<Bin>,
    },
}

/// A named event subscription clause: which event types feed this
/// counter and, optionally, a predicate over event fields.
///
/// The predicate and field extractor are opaque strings interpreted by
/// `privcount-core`'s counter-table engine; this crate only carries the
/// declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubscription {
    /// Event type names this counter listens to.
    pub event_types: Vec<String>,
    /// Optional predicate expression over event fields; absent means
    /// "always matches".
    #[serde(default)]
    pub predicate: Option<String>,
    /// Name of the event field supplying the bin value, for histogram
    /// counters. Ignored for scalar counters.
    #[serde(default)]
    pub bin_field: Option<String>,
    /// Name of the event field supplying the increment weight. Absent
    /// means "increment by 1".
    #[serde(default)]
    pub increment_field: Option<String>,
    /// Optional per-event cap key: counters sharing a cap key and a
    /// grouping field stop incrementing once `max_events` is reached for
    /// that key.
    #[serde(default)]
    pub cap: Option<EventCap>,
    /// Name of the event field identifying the logical entity (circuit,
    /// stream, connection) this counter accumulates over. When set,
    /// matching events accumulate into that entity's running total
    /// rather than incrementing the counter directly; the total is only
    /// folded into the counter, via `bin_field`, once the entity closes
    /// (an event carrying `end=true` for the same identifier) or is
    /// force-expired after outliving the round's rotation period.
    #[serde(default)]
    pub entity_field: Option<String>,
}

/// A per-grouping-key cap on how many events may increment a counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventCap {
    /// Maximum number of events per grouping key before this counter
    /// stops incrementing for that key.
    pub max_events: u64,
}

/// A single named, declaratively-configured counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    /// The counter's name, used as the PRF domain-separation label and as
    /// the outcome file's `Tally` key.
    pub name: String,
    /// The counter's shape (scalar or histogram).
    pub shape: CounterShape,
    /// Which events feed this counter and how.
    pub subscription: EventSubscription,
    /// Maximum contribution a single user/entity may make to this
    /// counter in one round, used to compute noise sigma.
    pub sensitivity: f64,
    /// The expected true value of this counter absent an attack or bug;
    /// used to sanity-check and to compute sigma allocation.
    pub expected_value: f64,
    /// Standard deviation of the Gaussian noise mechanism for this
    /// counter. `None` means "compute from epsilon/delta/sensitivity".
    #[serde(default)]
    pub sigma: Option<f64>,
}

impl Counter {
    /// Returns `true` if this is the distinguished validity ("zero")
    /// counter: sensitivity 0, expected value 0.
    pub fn is_zero_counter(&self) -> bool {
        self.sensitivity == 0.0 && self.expected_value == 0.0
    }

    /// Number of bins this counter declares (1 for scalar counters).
    pub fn bin_count(&self) -> usize {
        match &self.shape {
            CounterShape::Scalar => 1,
            CounterShape::Histogram { bins } => bins.len(),
        }
    }
}

/// The full, declarative counter table distributed as part of a round
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CounterTable {
    /// All declared counters, keyed implicitly by [`Counter::name`].
    pub counters: Vec<Counter>,
}

impl CounterTable {
    /// Looks up a counter by name.
    pub fn get(&self, name: &str) -> Option<&Counter> {
        self.counters.iter().find(|c| c.name == name)
    }

    /// Validates bin-edge monotonicity and non-overlap for every
    /// histogram counter, one of the Data Collector's validation gates.
    pub fn validate(&self) -> Result<(), String> {
        for counter in &self.counters {
            if let CounterShape::Histogram { bins } = &counter.shape {
                if bins.is_empty() {
                    return Err(format!("counter {} has no bins", counter.name));
                }
                for pair in bins.windows(2) {
                    if pair[0].hi.as_f64() > pair[1].lo.as_f64() {
                        return Err(format!(
                            "counter {} has non-monotonic bin edges",
                            counter.name
                        ));
                    }
                }
            }
            if counter.sensitivity < 0.0 {
                return Err(format!("counter {} has negative sensitivity", counter.name));
            }
            if counter.expected_value < 0.0 {
                return Err(format!(
                    "counter {} has negative expected value",
                    counter.name
                ));
            }
        }
        Ok(())
    }
}
