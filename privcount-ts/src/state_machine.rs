//! The round lifecycle state machine.
//!
//! A round moves strictly forward through `Idle -> Starting ->
//! Collecting -> Stopping -> Tallying -> Published`, with `Aborting`
//! reachable from any non-terminal state. Once `Published` or `Aborted`,
//! a round never transitions again; the coordinator starts a fresh round
//! instead.

use privcount_types::error::PrivcountError;

/// The current phase of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    /// No round configured yet.
    Idle,
    /// Round configuration distributed; waiting for quorum of
    /// acknowledging peers before counting can begin.
    Starting,
    /// Quorum reached; `Start` sent, counting in progress.
    Collecting,
    /// `Stop` sent; waiting for all expected share submissions.
    Stopping,
    /// All shares in; reconstructing and noising the tally.
    Tallying,
    /// Outcome file written; round complete.
    Published,
    /// The round was abandoned before completion.
    Aborting,
}

impl RoundState {
    /// Returns `true` if `next` is a legal transition from this state.
    pub fn can_transition_to(self, next: RoundState) -> bool {
        use RoundState::*;
        match (self, next) {
            (Idle, Starting) => true,
            (Starting, Collecting) => true,
            (Collecting, Stopping) => true,
            (Stopping, Tallying) => true,
            (Tallying, Published) => true,
            (_, Aborting) if !matches!(self, Published | Aborting) => true,
            _ => false,
        }
    }

    /// Returns `true` for the two states a round never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundState::Published | RoundState::Aborting)
    }
}

/// Errors produced by an illegal state transition attempt.
#[derive(Debug, thiserror::Error)]
#[error("cannot transition from {from:?} to {to:?}")]
pub struct IllegalTransition {
    /// The state the machine was in.
    pub from: RoundState,
    /// The state the caller attempted to transition to.
    pub to: RoundState,
}

/// A round's lifecycle state, with the machinery to move it forward and
/// to record why it was aborted.
#[derive(Debug, Clone)]
pub struct RoundLifecycle {
    state: RoundState,
    abort_reason: Option<PrivcountError>,
}

impl Default for RoundLifecycle {
    fn default() -> Self {
        Self {
            state: RoundState::Idle,
            abort_reason: None,
        }
    }
}

impl RoundLifecycle {
    /// The current state.
    pub fn state(&self) -> RoundState {
        self.state
    }

    /// The reason the round was aborted, if it was.
    pub fn abort_reason(&self) -> Option<&PrivcountError> {
        self.abort_reason.as_ref()
    }

    /// Attempts to move to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: RoundState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Aborts the round, regardless of its current state, and records
    /// why. A no-op if already terminal.
    pub fn abort(&mut self, reason: PrivcountError) {
        if self.state.is_terminal() {
            return;
        }
        self.state = RoundState::Aborting;
        self.abort_reason = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privcount_types::error::ErrorKind;

    #[test]
    fn happy_path_runs_in_order() {
        let mut lifecycle = RoundLifecycle::default();
        for next in [
            RoundState::Starting,
            RoundState::Collecting,
            RoundState::Stopping,
            RoundState::Tallying,
            RoundState::Published,
        ] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(lifecycle.state(), RoundState::Published);
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut lifecycle = RoundLifecycle::default();
        assert!(lifecycle.advance(RoundState::Collecting).is_err());
    }

    #[test]
    fn published_round_cannot_be_aborted() {
        let mut lifecycle = RoundLifecycle::default();
        for next in [
            RoundState::Starting,
            RoundState::Collecting,
            RoundState::Stopping,
            RoundState::Tallying,
            RoundState::Published,
        ] {
            lifecycle.advance(next).unwrap();
        }
        lifecycle.abort(PrivcountError {
            kind: ErrorKind::Internal,
            reason: "too late".into(),
        });
        assert_eq!(lifecycle.state(), RoundState::Published);
        assert!(lifecycle.abort_reason().is_none());
    }

    #[test]
    fn abort_is_reachable_from_any_non_terminal_state() {
        let mut lifecycle = RoundLifecycle::default();
        lifecycle.advance(RoundState::Starting).unwrap();
        lifecycle.abort(PrivcountError {
            kind: ErrorKind::QuorumNotMet,
            reason: "not enough peers".into(),
        });
        assert_eq!(lifecycle.state(), RoundState::Aborting);
        assert!(lifecycle.abort_reason().is_some());
    }
}
