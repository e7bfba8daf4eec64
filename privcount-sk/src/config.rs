//! Share Keeper configuration and CLI/environment parsing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

/// The Share Keeper's process configuration.
///
/// Populated from command-line flags or `PRIVCOUNT_SK_*` environment
/// variables.
#[derive(Parser, Debug)]
pub struct ShareKeeperConfig {
    /// Address of the Tally Server to connect to.
    #[clap(long, env = "PRIVCOUNT_SK_TS_ADDR")]
    pub ts_addr: SocketAddr,

    /// PEM certificate chain presented to the Tally Server.
    #[clap(long, env = "PRIVCOUNT_SK_TLS_CERT")]
    pub tls_cert_path: PathBuf,

    /// PEM private key matching `tls_cert_path`.
    #[clap(long, env = "PRIVCOUNT_SK_TLS_KEY")]
    pub tls_key_path: PathBuf,

    /// PEM bundle of CA certificates trusted to sign the Tally Server's
    /// certificate.
    #[clap(long, env = "PRIVCOUNT_SK_TLS_TRUSTED_CA")]
    pub tls_trusted_ca_path: PathBuf,

    /// Shared secret proven during the mutual handshake with the Tally
    /// Server.
    #[clap(long, env = "PRIVCOUNT_SK_HANDSHAKE_SECRET")]
    pub handshake_secret: SecretString,

    /// PKCS#8 PEM private key of this Share Keeper's long-lived RSA
    /// identity, used to unwrap relayed seeds and to derive this peer's
    /// fingerprint. Distinct from the TLS identity, exactly as on the
    /// Tally Server.
    #[clap(long, env = "PRIVCOUNT_SK_RSA_KEY")]
    pub rsa_private_key_path: PathBuf,

    /// PEM public key of the Tally Server's long-lived RSA identity, used
    /// to wrap this Share Keeper's share-submission key. Distributed
    /// out of band, the same way `tls_trusted_ca_path` distributes trust
    /// in the TS's TLS certificate.
    #[clap(long, env = "PRIVCOUNT_SK_TS_RSA_KEY")]
    pub ts_rsa_public_key_path: PathBuf,

    /// How much a counter's configured sigma may shrink relative to the
    /// last round this process accepted before it refuses to
    /// participate. Independent of the Tally Server's own
    /// `sigma_decrease_tolerance`: this is the Share Keeper's own,
    /// possibly stricter, local policy.
    #[clap(long, env = "PRIVCOUNT_SK_SIGMA_TOLERANCE", default_value_t = 0.0)]
    pub sigma_decrease_tolerance: f64,

    /// Maximum time to wait for the handshake to complete before giving
    /// up on the Tally Server.
    #[clap(
        long,
        env = "PRIVCOUNT_SK_HANDSHAKE_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub handshake_timeout: Duration,
}
