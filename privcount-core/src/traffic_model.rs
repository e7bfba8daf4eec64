//! Traffic-model-derived counters.
//!
//! A traffic model is an HMM-like state machine declared at round start:
//! a set of named states, a start state, and a transition table keyed by
//! `(state, label)`. The counter table is *derived* from the model so
//! that the Tally Server and every Data Collector agree on names and
//! bins without exchanging anything beyond the model declaration itself.

use std::collections::BTreeMap;

use privcount_types::counter::{Counter, CounterShape, EventSubscription};
use serde::{Deserialize, Serialize};

/// One declared state of a traffic model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficModelState {
    /// The state's name.
    pub name: String,
    /// Emission directions this state may observe (e.g. `"in"`/`"out"`).
    pub directions: Vec<String>,
}

/// A declarative HMM-like traffic model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficModel {
    /// The model's name, used as a counter-name prefix.
    pub name: String,
    /// The state declared as the model's start state.
    pub start_state: String,
    /// All declared states.
    pub states: Vec<TrafficModelState>,
    /// All declared transitions, as `(from_state, to_state)` pairs. Self
    /// transitions are permitted.
    pub transitions: Vec<(String, String)>,
}

impl TrafficModel {
    /// Derives the full set of emission and transition counters for this
    /// model, using the fixed naming scheme
    /// `"TrafficModel.<model>.<state>.<direction>"` for emissions and
    /// `"TrafficModel.<model>.<from>.<to>"` for transitions.
    pub fn derive_counters(&self) -> Vec<Counter> {
        let mut counters = Vec::new();
        for state in &self.states {
            for direction in &state.directions {
                counters.push(Counter {
                    name: format!("TrafficModel.{}.{}.{}", self.name, state.name, direction),
                    shape: CounterShape::Scalar,
                    subscription: EventSubscription {
                        event_types: vec!["TrafficModel.Emission".to_string()],
                        predicate: Some(format!(
                            "state == \"{}\" && direction == \"{}\"",
                            state.name, direction
                        )),
                        bin_field: None,
                        increment_field: None,
                        cap: None,
                        entity_field: None,
                    },
                    sensitivity: 1.0,
                    expected_value: 0.0,
                    sigma: None,
                });
            }
        }
        for (from, to) in &self.transitions {
            counters.push(Counter {
                name: format!("TrafficModel.{}.{}.{}", self.name, from, to),
                shape: CounterShape::Scalar,
                subscription: EventSubscription {
                    event_types: vec!["TrafficModel.Transition".to_string()],
                    predicate: Some(format!("from == \"{from}\" && to == \"{to}\"")),
                    bin_field: None,
                    increment_field: None,
                    cap: None,
                    entity_field: None,
                },
                sensitivity: 1.0,
                expected_value: 0.0,
                sigma: None,
            });
        }
        counters
    }

    /// Validates that every transition references a declared state and
    /// that `start_state` is declared.
    pub fn validate(&self) -> Result<(), String> {
        let known: BTreeMap<&str, &TrafficModelState> =
            self.states.iter().map(|s| (s.name.as_str(), s)).collect();
        if !known.contains_key(self.start_state.as_str()) {
            return Err(format!("unknown start state: {}", self.start_state));
        }
        for (from, to) in &self.transitions {
            if !known.contains_key(from.as_str()) {
                return Err(format!("transition references unknown state: {from}"));
            }
            if !known.contains_key(to.as_str()) {
                return Err(format!("transition references unknown state: {to}"));
            }
        }
        Ok(())
    }
}

/// Tracks one stream's current position in a traffic model, so the Data
/// Collector can translate a sequence of observations into transition
/// counter increments.
#[derive(Debug, Clone)]
pub struct ModelPosition {
    current_state: String,
}

impl ModelPosition {
    /// Starts tracking a new stream at the model's declared start state.
    pub fn new(model: &TrafficModel) -> Self {
        Self {
            current_state: model.start_state.clone(),
        }
    }

    /// Records a transition to `next_state`, returning the derived
    /// transition counter name to increment.
    pub fn advance(&mut self, model_name: &str, next_state: &str) -> String {
        let name = format!(
            "TrafficModel.{}.{}.{}",
            model_name, self.current_state, next_state
        );
        self.current_state = next_state.to_string();
        name
    }

    /// Returns the derived emission counter name for an observation of
    /// `direction` in the current state.
    pub fn emission_counter(&self, model_name: &str, direction: &str) -> String {
        format!(
            "TrafficModel.{}.{}.{}",
            model_name, self.current_state, direction
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> TrafficModel {
        TrafficModel {
            name: "Web".into(),
            start_state: "Idle".into(),
            states: vec![
                TrafficModelState {
                    name: "Idle".into(),
                    directions: vec!["in".into()],
                },
                TrafficModelState {
                    name: "Active".into(),
                    directions: vec!["in".into(), "out".into()],
                },
            ],
            transitions: vec![
                ("Idle".into(), "Active".into()),
                ("Active".into(), "Idle".into()),
            ],
        }
    }

    #[test]
    fn derives_deterministic_names() {
        let model = sample_model();
        let counters = model.derive_counters();
        let names: Vec<_> = counters.iter().map(|c| c.name.clone()).collect();
        assert!(names.contains(&"TrafficModel.Web.Idle.in".to_string()));
        assert!(names.contains(&"TrafficModel.Web.Active.out".to_string()));
        assert!(names.contains(&"TrafficModel.Web.Idle.Active".to_string()));
        assert_eq!(counters.len(), 3 + 2);
    }

    #[test]
    fn validate_rejects_unknown_transition_state() {
        let mut model = sample_model();
        model.transitions.push(("Idle".into(), "Ghost".into()));
        assert!(model.validate().is_err());
    }

    #[test]
    fn model_position_advances_and_names_consistently() {
        let model = sample_model();
        let mut pos = ModelPosition::new(&model);
        assert_eq!(pos.emission_counter("Web", "in"), "TrafficModel.Web.Idle.in");
        let transition = pos.advance("Web", "Active");
        assert_eq!(transition, "TrafficModel.Web.Idle.Active");
        assert_eq!(
            pos.emission_counter("Web", "out"),
            "TrafficModel.Web.Active.out"
        );
    }
}
