//! BSON length-prefix framing.
//!
//! Every BSON document begins with a little-endian signed 32-bit length that
//! includes the length field itself and the trailing NUL, so the documents
//! are self-delimiting and travel back to back with no extra framing.

use std::io;

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::BsonCodec;

use super::{peek_i32_le, DecodedFrame, ParseError, ParseErrorKind, DEFAULT_MAX_LEN};

/// A BSON document is at least 5 bytes: the length itself plus the
/// terminating NUL.
const MIN_DOCUMENT_LEN: i32 = 5;

/// Framing codec for back-to-back BSON documents.
#[derive(Clone)]
pub struct BsonFrameCodec {
    codec: BsonCodec,
    max_len: usize,
    /// Set once an irrecoverable framing error has been emitted; the decoder
    /// then stops making progress and waits for the consumer to close.
    poisoned: bool,
}

impl BsonFrameCodec {
    pub fn new(max_len: usize) -> Self {
        Self {
            codec: BsonCodec,
            max_len,
            poisoned: false,
        }
    }
}

impl Default for BsonFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEN)
    }
}

impl Decoder for BsonFrameCodec {
    type Item = DecodedFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.poisoned {
            return Ok(None);
        }
        let Some(len) = peek_i32_le(src) else {
            return Ok(None);
        };

        if len < MIN_DOCUMENT_LEN {
            // Negative and undersized lengths cannot delimit anything; the
            // buffer is left in place for diagnostics.
            self.poisoned = true;
            return Ok(Some(DecodedFrame::ParseError(ParseError::new(
                ParseErrorKind::InvalidFraming,
                src.clone().freeze(),
                format!("document length {len} is below the BSON minimum"),
                false,
            ))));
        }
        if len as u64 > self.max_len as u64 {
            self.poisoned = true;
            return Ok(Some(DecodedFrame::ParseError(ParseError::new(
                ParseErrorKind::ExceedsMaxLength,
                src.clone().freeze(),
                format!("document length {len} exceeds the maximum {}", self.max_len),
                false,
            ))));
        }
        if src.len() < len as usize {
            src.reserve(len as usize - src.len());
            return Ok(None);
        }

        let frame = src.split_to(len as usize).freeze();
        match self.codec.decode(&frame) {
            Ok(value) => Ok(Some(DecodedFrame::Message(value))),
            // The frame was already split off, so decoding continues with
            // the next document.
            Err(e) => {
                tracing::debug!(len, error = %e, "undecodable document");
                Ok(Some(DecodedFrame::ParseError(ParseError::new(
                    ParseErrorKind::InvalidBson,
                    frame,
                    e.to_string(),
                    true,
                ))))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() || self.poisoned {
            return Ok(None);
        }
        let rest = src.split_to(src.len()).freeze();
        Ok(Some(DecodedFrame::ParseError(ParseError::new(
            ParseErrorKind::TrailingGarbage,
            rest,
            "byte source drained mid-document",
            true,
        ))))
    }
}

impl Encoder<Value> for BsonFrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = self
            .codec
            .encode(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if encoded.len() > self.max_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "encoded document ({} bytes) exceeds the maximum {}",
                    encoded.len(),
                    self.max_len
                ),
            ));
        }
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}
