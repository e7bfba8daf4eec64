#![deny(missing_docs)]
//! The counter & share engine and the cryptographic primitives the peer
//! protocol builds on.
//!
//! This crate is the library shared by the Data Collector and Share
//! Keeper roles. It provides:
//!
//! * [`field`] — modular-ring arithmetic over the round's fixed prime
//!   `P`, and the signed-interpretation rule used at reconstruction.
//! * [`keystream`] — the deterministic, domain-separated PRF keystream
//!   every peer independently reproduces from a shared seed.
//! * [`counter_table`] — bin lookup in O(log b) per event, overflow
//!   handling, and blinded share initialization from a set of seeds.
//! * [`traffic_model`] — derivation of per-state/per-transition counters
//!   from a declared traffic model.
//! * [`noise`] — sigma computation from (epsilon, delta, sensitivity,
//!   weight), Gaussian sampling, and the inter-round delay policy.
//! * [`crypto`] — RSA-OAEP seed wrapping, AES-GCM share sealing, and the
//!   HMAC-SHA256 mutual handshake.

pub mod counter_table;
pub mod crypto;
pub mod field;
pub mod keystream;
pub mod noise;
pub mod traffic_model;

pub use field::Ring;
