//! Tally Server configuration and CLI/environment parsing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use privcount_types::fingerprint::FingerprintPattern;
use secrecy::SecretString;

/// The Tally Server's process configuration.
///
/// Populated from command-line flags or `PRIVCOUNT_TS_*` environment
/// variables.
#[derive(Parser, Debug)]
pub struct TallyServerConfig {
    /// Address to listen for peer connections on.
    #[clap(long, env = "PRIVCOUNT_TS_LISTEN_ADDR", default_value = "0.0.0.0:9001")]
    pub listen_addr: SocketAddr,

    /// Path to the round configuration file, applied to every round this
    /// process runs unless `continue_count` is exhausted.
    #[clap(long, env = "PRIVCOUNT_TS_ROUND_CONFIG")]
    pub round_config_path: PathBuf,

    /// Directory outcome files are written to, one per published round.
    #[clap(long, env = "PRIVCOUNT_TS_OUTCOME_DIR", default_value = "./outcomes")]
    pub outcome_dir: PathBuf,

    /// PEM certificate chain presented to connecting peers.
    #[clap(long, env = "PRIVCOUNT_TS_TLS_CERT")]
    pub tls_cert_path: PathBuf,

    /// PEM private key matching `tls_cert_path`.
    #[clap(long, env = "PRIVCOUNT_TS_TLS_KEY")]
    pub tls_key_path: PathBuf,

    /// PEM bundle of CA certificates trusted to sign peer client
    /// certificates.
    #[clap(long, env = "PRIVCOUNT_TS_TLS_TRUSTED_CA")]
    pub tls_trusted_ca_path: PathBuf,

    /// Shared secret proven during the mutual handshake with every peer.
    #[clap(long, env = "PRIVCOUNT_TS_HANDSHAKE_SECRET")]
    pub handshake_secret: SecretString,

    /// PKCS#8 PEM private key of this Tally Server's long-lived RSA
    /// identity, used to unwrap share-submission keys and to derive this
    /// peer's [`privcount_types::fingerprint::Fingerprint`]. Distinct
    /// from the TLS identity: the TLS layer only authenticates the
    /// transport, peer identity is established by the application-level
    /// handshake and this key.
    #[clap(long, env = "PRIVCOUNT_TS_RSA_KEY")]
    pub rsa_private_key_path: PathBuf,

    /// Maximum time to wait for a peer to complete the handshake before
    /// dropping the connection.
    #[clap(
        long,
        env = "PRIVCOUNT_TS_HANDSHAKE_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub handshake_timeout: Duration,

    /// Fingerprints of Data Collectors and Share Keepers allowed to
    /// register once the handshake completes; `*` admits any peer of
    /// the declared kind. A peer whose fingerprint matches no entry is
    /// refused with `UnknownPeer` before its `ConfigAck` or shares are
    /// counted.
    #[clap(
        long = "allowed-peer",
        env = "PRIVCOUNT_TS_ALLOWED_PEERS",
        value_delimiter = ',',
        value_parser = FingerprintPattern::parse
    )]
    pub allowed_peers: Vec<FingerprintPattern>,
}
