#![deny(missing_docs)]
//! The PrivCount peer protocol: TLS transport, line-delimited JSON
//! framing, and the mutual handshake that opens every session.
//!
//! Every connection between two roles (Tally Server, Share Keeper, Data
//! Collector) runs over TLS 1.2+, exchanges a `Hello`/`HelloAck` pair to
//! establish mutual identity, then carries [`privcount_types::protocol::Message`]
//! values as newline-terminated JSON for the rest of the session.

mod error;
pub mod framing;
pub mod handshake;
pub mod session;
pub mod tls;

pub use error::ProtoError;
pub use session::PeerSession;
