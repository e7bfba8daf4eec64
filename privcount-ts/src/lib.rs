#![deny(missing_docs)]
//! The Tally Server: the sole coordinator of a PrivCount round.
//!
//! The Tally Server distributes round configuration, gates progress on
//! quorum, relays seed exchange between Data Collectors and Share
//! Keepers, collects encrypted share submissions at round end,
//! reconstructs and noises the tally, and publishes the outcome file.

pub mod config;
pub mod coordinator;
pub mod delay_policy;
pub mod outcome_writer;
pub mod server;
pub mod sigma_alloc;
pub mod state_machine;

pub use config::TallyServerConfig;
pub use coordinator::Coordinator;
pub use server::TallyServer;
pub use state_machine::RoundState;
