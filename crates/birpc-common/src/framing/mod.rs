//! Framing codecs: raw byte chunks in, decoded messages out.
//!
//! Each framing mode is a [`tokio_util::codec::Decoder`] /
//! [`tokio_util::codec::Encoder`] pair. Decoders never fail the stream on
//! malformed input; instead they yield [`DecodedFrame::ParseError`] items
//! in-band, in arrival order, so the dispatcher can apply the per-mode
//! recovery policy (answer with a nil-id parse error, then either continue
//! or tear the connection down). Only genuine transport faults surface as
//! `io::Error`.
//!
//! # Framing Modes
//!
//! - **[`BsonFrameCodec`]**: raw BSON documents back to back, delimited by
//!   each document's own little-endian length prefix.
//! - **[`JsonStreamCodec`]**: concatenated UTF-8 JSON values with no
//!   separators, split by an incremental parser.
//! - **[`JsonRecordCodec`]**: RFC 7464 records, `0x1E` + JSON + `0x0A`.

use bytes::{Bytes, BytesMut};
use serde_json::Value;

mod bson_frame;
mod json_record;
mod json_stream;


pub use bson_frame::BsonFrameCodec;
pub use json_record::JsonRecordCodec;
pub use json_stream::JsonStreamCodec;

/// Largest frame accepted by default: the BSON document size cap.
pub const DEFAULT_MAX_LEN: usize = i32::MAX as usize;

/// One element of the decoded inbound sequence.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    /// A successfully decoded message value.
    Message(Value),
    /// A frame (or span of bytes) that failed framing or decoding.
    ParseError(ParseError),
}

/// Classification of a framing/decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A frame announced a length above the configured maximum.
    ExceedsMaxLength,
    /// Bytes that cannot be a frame boundary (bad length prefix, data
    /// outside an RFC 7464 record).
    InvalidFraming,
    /// A frame or value that is not valid JSON.
    InvalidJson,
    /// A frame that is not a valid BSON document.
    InvalidBson,
    /// Leftover bytes when the byte source drained mid-message.
    TrailingGarbage,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParseErrorKind::ExceedsMaxLength => "exceeds-max-length",
            ParseErrorKind::InvalidFraming => "invalid-framing",
            ParseErrorKind::InvalidJson => "invalid-json",
            ParseErrorKind::InvalidBson => "invalid-bson",
            ParseErrorKind::TrailingGarbage => "trailing-garbage",
        };
        f.write_str(name)
    }
}

/// A malformed span of inbound bytes, delivered in-band.
#[derive(Debug, Clone)]
pub struct ParseError {
    /// What went wrong.
    pub kind: ParseErrorKind,
    /// The offending bytes (possibly truncated for oversized frames).
    pub bytes: Bytes,
    /// Human-readable detail, e.g. the decoder's own error text.
    pub detail: String,
    /// Whether the decoder can keep producing frames after this error.
    /// Irrecoverable errors oblige the consumer to close the connection.
    pub recoverable: bool,
}

impl ParseError {
    pub(crate) fn new(
        kind: ParseErrorKind,
        bytes: Bytes,
        detail: impl Into<String>,
        recoverable: bool,
    ) -> Self {
        Self {
            kind,
            bytes,
            detail: detail.into(),
            recoverable,
        }
    }

    /// A one-line description suitable for the `data` member of a parse
    /// error response.
    pub fn describe(&self) -> String {
        format!("{} ({} bytes): {}", self.kind, self.bytes.len(), self.detail)
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Read the little-endian i32 at the front of the buffer without consuming.
pub(crate) fn peek_i32_le(buf: &BytesMut) -> Option<i32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(i32::from_le_bytes(bytes))
}

/// Position of the first occurrence of `byte`, if any.
pub(crate) fn find_byte(buf: &[u8], byte: u8) -> Option<usize> {
    buf.iter().position(|&b| b == byte)
}

/// Split off and return everything before the first occurrence of `byte`.
/// Returns `None` (leaving the buffer untouched) when `byte` is absent.
pub(crate) fn split_before_byte(buf: &mut BytesMut, byte: u8) -> Option<BytesMut> {
    find_byte(buf, byte).map(|pos| buf.split_to(pos))
}

/// Split off and return everything up to and including the first occurrence
/// of `byte`. Returns `None` when `byte` is absent.
pub(crate) fn split_after_byte(buf: &mut BytesMut, byte: u8) -> Option<BytesMut> {
    find_byte(buf, byte).map(|pos| buf.split_to(pos + 1))
}
