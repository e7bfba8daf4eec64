//! The event model consumed by the Data Collector.
//!
//! The source protocol lists dozens of event kinds; rather than encode
//! each as its own Rust type (which would require a code change for every
//! new Tor event), events are modeled as a tagged header plus a field map.
//! The counter table ([`crate::counter::EventSubscription`]) references
//! fields by name, never by kind-specific accessor — this is what keeps
//! the core agnostic to Tor event semantics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar field value carried by an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A signed integer field (timestamps, byte counts, cell counts).
    Integer(i64),
    /// A floating-point field (e.g. a computed squared-log delay).
    Number(f64),
    /// A short categorical or identifier string.
    Text(String),
    /// A boolean flag (e.g. "entity ended").
    Bool(bool),
}

impl FieldValue {
    /// Interprets this value as `f64`, for bin lookup. Booleans convert
    /// to `0.0`/`1.0`; strings never convert and yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Number(n) => Some(*n),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Text(_) => None,
        }
    }

    /// Interprets this value as a string, for categorical matching.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// The header common to every event: a monotonically non-decreasing
/// timestamp, the logical entity (session/circuit/stream/connection) it
/// belongs to if any, and a per-source sequence number used to detect
/// gaps across event-source reconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    /// The event type name, matched against
    /// [`crate::counter::EventSubscription::event_types`].
    pub event_type: String,
    /// Monotonically non-decreasing timestamp, milliseconds since an
    /// arbitrary but source-stable epoch.
    pub timestamp_ms: u64,
    /// Identifier of the logical entity (circuit/stream/connection) this
    /// event pertains to, if any.
    #[serde(default)]
    pub entity_id: Option<u64>,
    /// Per-source monotonically increasing sequence number.
    pub sequence: u64,
}

/// A single event observed from the event source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// The common header.
    pub header: EventHeader,
    /// Typed fields, keyed by name. The counter table's field extractors
    /// and predicates address these by name.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Event {
    /// Creates a new event with an empty field map.
    pub fn new(event_type: impl Into<String>, timestamp_ms: u64, sequence: u64) -> Self {
        Self {
            header: EventHeader {
                event_type: event_type.into(),
                timestamp_ms,
                entity_id: None,
                sequence,
            },
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Builder-style entity id setter.
    pub fn with_entity(mut self, entity_id: u64) -> Self {
        self.header.entity_id = Some(entity_id);
        self
    }

    /// Returns `true` if this is a pure liveness/bookkeeping event: one
    /// whose type begins with `"Bookkeeping."`. Such events are the only
    /// ones the bounded event queue is permitted to drop on overflow
    ///.
    pub fn is_bookkeeping(&self) -> bool {
        self.header.event_type.starts_with("Bookkeeping.")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} @{}ms",
            self.header.event_type, self.header.sequence, self.header.timestamp_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bookkeeping_events_are_identified_by_prefix() {
        let ev = Event::new("Bookkeeping.Ping", 0, 0);
        assert!(ev.is_bookkeeping());
        let ev = Event::new("Circuit.Ended", 0, 0);
        assert!(!ev.is_bookkeeping());
    }

    #[test]
    fn field_value_numeric_coercion() {
        assert_eq!(FieldValue::Integer(5).as_f64(), Some(5.0));
        assert_eq!(FieldValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(FieldValue::Text("x".into()).as_f64(), None);
    }
}
