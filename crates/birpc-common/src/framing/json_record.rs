//! RFC 7464 (JSON text sequence) framing.
//!
//! Each record is `0x1E` + UTF-8 JSON + `0x0A`. The record separator makes
//! every error in this mode recoverable: garbage and broken records are
//! skipped and decoding resumes at the next record boundary.

use std::io;

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::JsonCodec;

use super::{
    split_after_byte, split_before_byte, DecodedFrame, ParseError, ParseErrorKind, DEFAULT_MAX_LEN,
};

/// Record separator: every record starts with this byte.
const RS: u8 = 0x1E;
/// Line feed: every record ends with this byte.
const LF: u8 = 0x0A;

/// Framing codec for RFC 7464 JSON text sequences.
#[derive(Clone)]
pub struct JsonRecordCodec {
    codec: JsonCodec,
    max_len: usize,
}

impl JsonRecordCodec {
    pub fn new(codec: JsonCodec, max_len: usize) -> Self {
        Self { codec, max_len }
    }
}

impl Default for JsonRecordCodec {
    fn default() -> Self {
        Self::new(JsonCodec::new(), DEFAULT_MAX_LEN)
    }
}

impl Decoder for JsonRecordCodec {
    type Item = DecodedFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] != RS {
            // Garbage before the next record boundary. It can only be
            // delimited once a separator shows up.
            let Some(garbage) = split_before_byte(src, RS) else {
                return Ok(None);
            };
            tracing::debug!(skipped = garbage.len(), "skipping bytes outside any record");
            return Ok(Some(DecodedFrame::ParseError(ParseError::new(
                ParseErrorKind::InvalidFraming,
                garbage.freeze(),
                "bytes outside any record",
                true,
            ))));
        }

        let Some(record) = split_after_byte(src, LF) else {
            return Ok(None);
        };
        let record = record.freeze();
        // Strip the leading RS and the trailing LF.
        let body = record.slice(1..record.len() - 1);

        if body.len() > self.max_len {
            return Ok(Some(DecodedFrame::ParseError(ParseError::new(
                ParseErrorKind::ExceedsMaxLength,
                record,
                format!("record body ({} bytes) exceeds the maximum {}", body.len(), self.max_len),
                true,
            ))));
        }
        match self.codec.decode(&body) {
            Ok(value) => Ok(Some(DecodedFrame::Message(value))),
            Err(e) => Ok(Some(DecodedFrame::ParseError(ParseError::new(
                ParseErrorKind::InvalidJson,
                record,
                e.to_string(),
                true,
            )))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len()).freeze();
        Ok(Some(DecodedFrame::ParseError(ParseError::new(
            ParseErrorKind::TrailingGarbage,
            rest,
            "byte source drained mid-record",
            true,
        ))))
    }
}

impl Encoder<Value> for JsonRecordCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = self
            .codec
            .encode(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        dst.reserve(encoded.len() + 2);
        dst.extend_from_slice(&[RS]);
        dst.extend_from_slice(&encoded);
        dst.extend_from_slice(&[LF]);
        Ok(())
    }
}
