/// Errors raised while establishing or driving a peer session.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The other side closed the connection.
    #[error("peer closed the connection")]
    Eof,
    /// A line exceeded [`crate::framing::MAX_LINE_LENGTH`].
    #[error("line exceeded the maximum protocol length")]
    LineTooLong,
    /// The line was not valid JSON for the expected message type.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// The handshake's HMAC proof did not verify.
    #[error("handshake proof did not verify")]
    HandshakeFailed,
    /// The peer announced a protocol version we don't support.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    /// The peer's fingerprint did not match any configured allow-list
    /// entry.
    #[error("peer fingerprint {0} is not on the allow-list")]
    UnknownPeer(privcount_types::fingerprint::Fingerprint),
    /// The message received was not the one expected at this point in
    /// the session.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        /// What was expected.
        expected: &'static str,
        /// What arrived instead.
        got: String,
    },
    /// An I/O error occurred on the underlying TLS stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),
}
