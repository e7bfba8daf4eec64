//! A line-delimited JSON codec for [`tokio_util::codec::Framed`].
//!
//! Each protocol message is one JSON object terminated by `\n`. Lines
//! longer than [`MAX_LINE_LENGTH`] are rejected outright rather than
//! buffered, so a misbehaving or malicious peer cannot exhaust memory by
//! never sending a newline.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use privcount_types::protocol::MAX_LINE_LENGTH;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use crate::ProtoError;

/// Re-export of the protocol's fixed line-length cap, for callers that
/// want to pre-size buffers.
pub const MAX_LINE_LENGTH_BYTES: usize = MAX_LINE_LENGTH;

/// A [`Decoder`]/[`Encoder`] pair that reads and writes `T` as one JSON
/// object per line.
pub struct JsonLineCodec<T> {
    _marker: PhantomData<T>,
}

impl<T> JsonLineCodec<T> {
    /// Creates a new codec instance.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = T;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, ProtoError> {
        let Some(newline_at) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_LINE_LENGTH {
                return Err(ProtoError::LineTooLong);
            }
            return Ok(None);
        };
        if newline_at > MAX_LINE_LENGTH {
            return Err(ProtoError::LineTooLong);
        }
        let mut line = src.split_to(newline_at + 1);
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.is_empty() {
            return self.decode(src);
        }
        serde_json::from_slice(&line).map(Some).map_err(|e| ProtoError::Malformed(e.to_string()))
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec<T> {
    type Error = ProtoError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), ProtoError> {
        let json = serde_json::to_vec(&item).map_err(|e| ProtoError::Malformed(e.to_string()))?;
        if json.len() > MAX_LINE_LENGTH {
            return Err(ProtoError::LineTooLong);
        }
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
