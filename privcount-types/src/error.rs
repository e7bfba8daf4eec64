//! The shared error kind catalog.
//!
//! [`ErrorKind`] is the wire-visible classification every peer uses to
//! label aborts; [`PrivcountError`] is the concrete error type libraries
//! in this workspace raise, carrying one [`ErrorKind`] plus context.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of every error a PrivCount role may raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    /// A configuration value failed validation.
    ConfigInvalid,
    /// The mutual handshake failed.
    BadHandshake,
    /// A peer's fingerprint is not on the configured allow-list.
    UnknownPeer,
    /// Fewer than the configured threshold of DCs or SKs confirmed the
    /// round configuration.
    QuorumNotMet,
    /// A proposed sigma decreased without the required delay having
    /// elapsed.
    SigmaPolicyViolation,
    /// Seed exchange between a DC and an SK failed.
    SeedExchangeFailed,
    /// The bounded event queue overflowed on events that feed counters.
    EventOverflow,
    /// Events were missed across an event-source reconnect.
    SourceGap,
    /// A peer failed to submit its shares before the deadline.
    SubmissionTimeout,
    /// A selected peer's share never arrived for reconstruction.
    MissingShares,
    /// An RSA, AEAD, or HMAC operation failed.
    CryptoFailure,
    /// A peer violated the protocol's message ordering or framing rules.
    ProtocolViolation,
    /// An error not attributable to the categories above.
    Internal,
}

impl ErrorKind {
    /// Whether this kind causes the enclosing round to abort, rather
    /// than being locally recovered or treated as a process-fatal error
    ///.
    pub fn is_round_abort(self) -> bool {
        matches!(
            self,
            ErrorKind::SeedExchangeFailed
                | ErrorKind::EventOverflow
                | ErrorKind::SubmissionTimeout
                | ErrorKind::MissingShares
                | ErrorKind::SigmaPolicyViolation
                | ErrorKind::QuorumNotMet
        )
    }

    /// Whether this kind is fatal to the whole process, rather than
    /// just the current round.
    pub fn is_process_abort(self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigInvalid | ErrorKind::CryptoFailure | ErrorKind::BadHandshake
        )
    }

    /// The process exit code this kind maps to:
    /// 1 configuration error, 2 runtime failure, 3 crypto/handshake
    /// failure.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::ConfigInvalid => 1,
            ErrorKind::BadHandshake | ErrorKind::CryptoFailure => 3,
            _ => 2,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A PrivCount error: one [`ErrorKind`] plus a one-sentence, human
/// reason. Every abort is logged with exactly this shape.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {reason}")]
pub struct PrivcountError {
    /// The error's classification.
    pub kind: ErrorKind,
    /// A one-sentence, human-readable reason.
    pub reason: String,
}

impl PrivcountError {
    /// Constructs a new error of the given kind.
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_abort_and_process_abort_are_disjoint() {
        let all = [
            ErrorKind::ConfigInvalid,
            ErrorKind::BadHandshake,
            ErrorKind::UnknownPeer,
            ErrorKind::QuorumNotMet,
            ErrorKind::SigmaPolicyViolation,
            ErrorKind::SeedExchangeFailed,
            ErrorKind::EventOverflow,
            ErrorKind::SourceGap,
            ErrorKind::SubmissionTimeout,
            ErrorKind::MissingShares,
            ErrorKind::CryptoFailure,
            ErrorKind::ProtocolViolation,
            ErrorKind::Internal,
        ];
        for kind in all {
            assert!(!(kind.is_round_abort() && kind.is_process_abort()), "{kind:?}");
        }
    }

    #[test]
    fn exit_codes_follow_error_classification() {
        assert_eq!(ErrorKind::ConfigInvalid.exit_code(), 1);
        assert_eq!(ErrorKind::CryptoFailure.exit_code(), 3);
        assert_eq!(ErrorKind::BadHandshake.exit_code(), 3);
        assert_eq!(ErrorKind::Internal.exit_code(), 2);
    }
}
