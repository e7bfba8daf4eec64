//! A single peer session: a TLS stream framed as line-delimited JSON
//! [`Message`] values.
//!
//! Thin wrapper, conservative about errors: anything unexpected on the
//! wire ends the session rather than trying to recover mid-stream.

use futures::{SinkExt, StreamExt};
use privcount_types::protocol::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::framing::JsonLineCodec;
use crate::ProtoError;

/// An open session with a peer, generic over the underlying transport so
/// tests can drive it over an in-memory duplex pipe instead of real TLS.
pub struct PeerSession<S> {
    inner: Framed<S, JsonLineCodec<Message>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerSession<S> {
    /// Wraps an already-established TLS stream as a peer session.
    pub fn new(stream: S) -> Self {
        Self {
            inner: Framed::new(stream, JsonLineCodec::new()),
        }
    }

    /// Sends one message, flushing immediately so timing-sensitive
    /// messages like `Start`/`Stop` aren't held in a write buffer.
    pub async fn send(&mut self, msg: Message) -> Result<(), ProtoError> {
        self.inner.send(msg).await
    }

    /// Reads the next message, or [`ProtoError::Eof`] if the peer closed
    /// the connection.
    pub async fn recv(&mut self) -> Result<Message, ProtoError> {
        match self.inner.next().await {
            Some(Ok(msg)) => Ok(msg),
            Some(Err(err)) => Err(err),
            None => Err(ProtoError::Eof),
        }
    }

    /// Reads the next message, returning [`ProtoError::UnexpectedMessage`]
    /// if it isn't the variant `matcher` names.
    pub async fn expect<T>(
        &mut self,
        expected: &'static str,
        matcher: impl FnOnce(Message) -> Result<T, Message>,
    ) -> Result<T, ProtoError> {
        let msg = self.recv().await?;
        matcher(msg).map_err(|got| ProtoError::UnexpectedMessage {
            expected,
            got: got.kind_name().to_string(),
        })
    }
}
