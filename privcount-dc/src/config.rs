//! Data Collector configuration and CLI/environment parsing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

/// The Data Collector's process configuration.
///
/// Populated from command-line flags or `PRIVCOUNT_DC_*` environment
/// variables.
#[derive(Parser, Debug)]
pub struct DataCollectorConfig {
    /// Address of the Tally Server to connect to.
    #[clap(long, env = "PRIVCOUNT_DC_TS_ADDR")]
    pub ts_addr: SocketAddr,

    /// PEM certificate chain presented to the Tally Server.
    #[clap(long, env = "PRIVCOUNT_DC_TLS_CERT")]
    pub tls_cert_path: PathBuf,

    /// PEM private key matching `tls_cert_path`.
    #[clap(long, env = "PRIVCOUNT_DC_TLS_KEY")]
    pub tls_key_path: PathBuf,

    /// PEM bundle of CA certificates trusted to sign the Tally Server's
    /// certificate.
    #[clap(long, env = "PRIVCOUNT_DC_TLS_TRUSTED_CA")]
    pub tls_trusted_ca_path: PathBuf,

    /// Shared secret proven during the mutual handshake with the Tally
    /// Server.
    #[clap(long, env = "PRIVCOUNT_DC_HANDSHAKE_SECRET")]
    pub handshake_secret: SecretString,

    /// PKCS#8 PEM private key of this Data Collector's long-lived RSA
    /// identity, used to derive this peer's fingerprint. Distinct from
    /// the TLS identity, exactly as on the Tally Server and every Share
    /// Keeper.
    #[clap(long, env = "PRIVCOUNT_DC_RSA_KEY")]
    pub rsa_private_key_path: PathBuf,

    /// Directory of PEM public keys, one per Share Keeper this process
    /// may pair with. Each file is fingerprinted on load; the filename
    /// is only a loading convenience, never trusted as identity.
    /// Distributed out of band, the same way `tls_trusted_ca_path`
    /// distributes TLS trust.
    #[clap(long, env = "PRIVCOUNT_DC_SK_KEYS_DIR")]
    pub sk_public_keys_dir: PathBuf,

    /// PEM public key of the Tally Server's long-lived RSA identity, used
    /// to wrap this Data Collector's share-submission key. Distributed
    /// out of band, the same way `tls_trusted_ca_path` distributes trust
    /// in the TS's TLS certificate.
    #[clap(long, env = "PRIVCOUNT_DC_TS_RSA_KEY")]
    pub ts_rsa_public_key_path: PathBuf,

    /// Address of the local event source to connect to.
    #[clap(long, env = "PRIVCOUNT_DC_EVENT_SOURCE_ADDR")]
    pub event_source_addr: SocketAddr,

    /// Password proven to the event source at connect time. Mutually
    /// exclusive with `event_source_cookie_path`.
    #[clap(long, env = "PRIVCOUNT_DC_EVENT_SOURCE_PASSWORD")]
    pub event_source_password: Option<SecretString>,

    /// Path to a cookie file whose contents are the event source's
    /// shared secret. Mutually exclusive with `event_source_password`.
    #[clap(long, env = "PRIVCOUNT_DC_EVENT_SOURCE_COOKIE")]
    pub event_source_cookie_path: Option<PathBuf>,

    /// Interval between event-source reconnect attempts after a dropped
    /// connection.
    #[clap(
        long,
        env = "PRIVCOUNT_DC_EVENT_SOURCE_RECONNECT_INTERVAL",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub event_source_reconnect_interval: Duration,

    /// Capacity of the bounded channel between the event source and the
    /// counter-update task. Liveness pings are dropped once full;
    /// counter-affecting events overflowing this queue abort the round.
    #[clap(long, env = "PRIVCOUNT_DC_EVENT_QUEUE_CAPACITY", default_value_t = 4096)]
    pub event_queue_capacity: usize,

    /// Event types this process can source, used at the validation gate
    /// that refuses a round asking for an event type it cannot provide.
    #[clap(long = "supported-event-type", env = "PRIVCOUNT_DC_SUPPORTED_EVENT_TYPES", value_delimiter = ',')]
    pub supported_event_types: Vec<String>,

    /// How much a counter's configured sigma may shrink relative to the
    /// last round this process accepted before it refuses to
    /// participate.
    #[clap(long, env = "PRIVCOUNT_DC_SIGMA_TOLERANCE", default_value_t = 0.0)]
    pub sigma_decrease_tolerance: f64,

    /// Maximum time to wait for the handshake to complete before giving
    /// up on the Tally Server.
    #[clap(
        long,
        env = "PRIVCOUNT_DC_HANDSHAKE_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub handshake_timeout: Duration,
}

impl DataCollectorConfig {
    /// Validates the event-source authentication configuration: exactly
    /// one of a password or a cookie file must be set.
    pub fn validate(&self) -> Result<(), String> {
        match (
            self.event_source_password.is_some(),
            self.event_source_cookie_path.is_some(),
        ) {
            (true, false) | (false, true) => Ok(()),
            (true, true) => Err("set only one of --event-source-password or --event-source-cookie".into()),
            (false, false) => Err("one of --event-source-password or --event-source-cookie is required".into()),
        }
    }
}
