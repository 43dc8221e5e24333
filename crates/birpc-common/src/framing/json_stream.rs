//! Frameless JSON framing.
//!
//! Messages travel as concatenated UTF-8 JSON values with no separators at
//! all; an incremental parser finds the value boundaries. A parse fault is
//! unrecoverable in this mode because nothing downstream of the fault can be
//! re-synchronized.

use std::io;

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::JsonCodec;

use super::{DecodedFrame, ParseError, ParseErrorKind};

/// Framing codec for concatenated JSON values.
#[derive(Clone, Default)]
pub struct JsonStreamCodec {
    codec: JsonCodec,
    poisoned: bool,
}

impl JsonStreamCodec {
    pub fn new(codec: JsonCodec) -> Self {
        Self {
            codec,
            poisoned: false,
        }
    }
}

impl Decoder for JsonStreamCodec {
    type Item = DecodedFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.poisoned || src.is_empty() {
            return Ok(None);
        }

        let mut values = serde_json::Deserializer::from_slice(src).into_iter::<Value>();
        match values.next() {
            None => {
                // Nothing but whitespace so far.
                src.clear();
                Ok(None)
            }
            Some(Ok(value)) => {
                let consumed = values.byte_offset();
                src.advance(consumed);
                Ok(Some(DecodedFrame::Message(self.codec.transform(value))))
            }
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => {
                self.poisoned = true;
                Ok(Some(DecodedFrame::ParseError(ParseError::new(
                    ParseErrorKind::InvalidJson,
                    src.clone().freeze(),
                    e.to_string(),
                    false,
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
        // The source drained in the middle of a value.
        let rest = src.split_to(src.len()).freeze();
        Ok(Some(DecodedFrame::ParseError(ParseError::new(
            ParseErrorKind::TrailingGarbage,
            rest,
            "byte source drained mid-value",
            true,
        ))))
    }
}

impl Encoder<Value> for JsonStreamCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = self
            .codec
            .encode(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}
