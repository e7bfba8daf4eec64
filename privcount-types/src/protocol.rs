//! The peer protocol message catalog.
//!
//! Line-delimited JSON over TLS 1.2+. Transport authentication is TLS's
//! job; this layer adds one thing on top of it, a three-message mutual
//! handshake (`Hello` / `HelloAck` / `HelloConfirm`) that proves both
//! sides know the pre-shared handshake secret before either trusts the
//! other's declared role and fingerprint. No message after the handshake
//! carries a per-message authenticator of its own.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::fingerprint::{Fingerprint, PeerKind};
use crate::round::{ConfigHash, RoundConfig, RoundId};
use crate::share::ShareMap;

/// Maximum line length accepted on the peer protocol, in bytes. Defaults
/// to 16 MiB to accommodate large traffic-model submissions.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// The 32-byte nonce exchanged during the handshake.
pub type Nonce = [u8; 32];

/// One message of the peer protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// First message on a new session: announces identity and proves
    /// liveness.
    Hello {
        /// The sender's role.
        peer_kind: PeerKind,
        /// The sender's fingerprint.
        fingerprint: Fingerprint,
        /// A fresh random nonce for this handshake.
        nonce: Nonce,
        /// The sender's wire protocol version.
        protocol_version: u32,
    },
    /// Response to [`Message::Hello`], completing the mutual handshake.
    HelloAck {
        /// The responder's fingerprint.
        fingerprint: Fingerprint,
        /// A fresh random nonce chosen by the responder.
        nonce: Nonce,
        /// `HMAC-SHA256(handshake_secret, "role_tag" || their_nonce ||
        /// our_nonce || our_fingerprint)`.
        proof: Vec<u8>,
    },
    /// Closes the handshake: the initiator's own proof of the pre-shared
    /// secret, verified by the responder before it trusts the `Hello`
    /// it received. Without this, a responder would accept any claimed
    /// `peer_kind`/`fingerprint` on the strength of its own proof alone.
    HelloConfirm {
        /// `HMAC-SHA256(handshake_secret, "role_tag" || our_nonce ||
        /// their_nonce || our_fingerprint)`, computed by the initiator
        /// once it knows the responder's nonce.
        proof: Vec<u8>,
    },
    /// Periodic or on-demand liveness/status report.
    Status {
        /// A short machine-readable state label.
        state: String,
        /// Optional human-readable detail.
        #[serde(default)]
        detail: Option<String>,
    },
    /// The Tally Server distributes a round configuration.
    RoundConfig {
        /// The full, immutable configuration for the round.
        config: RoundConfig,
    },
    /// A peer's acknowledgement of a distributed [`Message::RoundConfig`].
    ConfigAck {
        /// The content hash of the configuration being acknowledged.
        config_hash: ConfigHash,
        /// `true` to accept and prepare to participate; `false` to
        /// refuse.
        accept: bool,
        /// Present when `accept` is `false`: the refusal reason.
        #[serde(default)]
        reason: Option<String>,
    },
    /// A share seed, relayed by the Tally Server between a DC and an SK,
    /// encrypted under the recipient's RSA public key.
    Seed {
        /// Sending Data Collector's fingerprint.
        from_dc: Fingerprint,
        /// Receiving Share Keeper's fingerprint.
        to_sk: Fingerprint,
        /// RSA-OAEP(SHA-256) encrypted 256-bit seed.
        encrypted_seed: Vec<u8>,
    },
    /// Signals all confirmed peers to begin counting.
    Start,
    /// Signals all peers to end the counting window and submit shares.
    Stop,
    /// A DC or SK's encrypted share submission, sent after receiving
    /// [`Message::Stop`].
    ShareSubmit {
        /// AES-GCM ciphertext of the sender's [`ShareMap`] (see
        /// `privcount_core::crypto::aead`).
        sealed_shares: Vec<u8>,
        /// 96-bit AES-GCM nonce.
        aead_nonce: [u8; 12],
        /// The per-submission symmetric key, RSA-OAEP-wrapped under the
        /// Tally Server's public key.
        wrapped_key: Vec<u8>,
    },
    /// Announces that a round has fully concluded (published or
    /// aborted).
    RoundEnd {
        /// The round that ended.
        round_id: RoundId,
        /// `true` if an outcome file was written.
        outcome_published: bool,
    },
    /// Aborts the current round or, for process-fatal kinds, the
    /// session.
    Abort {
        /// The error classification.
        kind: ErrorKind,
        /// A one-sentence human reason.
        reason: String,
        /// The round this abort pertains to, if any.
        #[serde(default)]
        round_id: Option<RoundId>,
    },
}

impl Message {
    /// A short, stable name for this message's variant, used in log
    /// fields.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "Hello",
            Message::HelloAck { .. } => "HelloAck",
            Message::HelloConfirm { .. } => "HelloConfirm",
            Message::Status { .. } => "Status",
            Message::RoundConfig { .. } => "RoundConfig",
            Message::ConfigAck { .. } => "ConfigAck",
            Message::Seed { .. } => "Seed",
            Message::Start => "Start",
            Message::Stop => "Stop",
            Message::ShareSubmit { .. } => "ShareSubmit",
            Message::RoundEnd { .. } => "RoundEnd",
            Message::Abort { .. } => "Abort",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_json_by_tag() {
        let msg = Message::Start;
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"Start\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Message::Start));
    }

    #[test]
    fn abort_carries_kind_and_reason() {
        let msg = Message::Abort {
            kind: ErrorKind::MissingShares,
            reason: "sk never submitted".into(),
            round_id: Some(RoundId(3)),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::Abort { kind, round_id, .. } => {
                assert_eq!(kind, ErrorKind::MissingShares);
                assert_eq!(round_id, Some(RoundId(3)));
            }
            _ => panic!("wrong variant"),
        }
    }
}
