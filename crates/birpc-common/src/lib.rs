//! birpc Common Types, Codecs and Framing
//!
//! This crate provides the protocol layer shared by both ends of a birpc
//! connection. birpc is a symmetric, bidirectional JSON-RPC 2.0 peer: after
//! connecting, either side may send requests, receive responses, or deliver
//! fire-and-forget notifications. A BSON-framed flavour ("BSON-RPC") uses
//! the same message schema with a `bsonrpc` protocol tag.
//!
//! # Components
//!
//! - [`protocol`] - message builders, wire error objects and the message
//!   classifier
//! - [`codec`] - JSON and BSON value codecs over one in-memory value type
//! - [`framing`] - stream decoders/encoders for the three framing modes
//!   (BSON length-prefix, frameless JSON, RFC 7464 records)
//!
//! # Wire Formats
//!
//! - **BSON**: raw BSON documents back to back; each document's leading
//!   little-endian length makes it self-delimiting.
//! - **JSON frameless**: concatenated UTF-8 JSON values with no separators.
//! - **JSON RFC 7464**: each message as `0x1E` + UTF-8 JSON + `0x0A`.
//!
//! # Example
//!
//! ```
//! use birpc_common::protocol::{classify, message, Inbound};
//! use birpc_common::codec::Codec;
//! use serde_json::json;
//!
//! let codec = Codec::json();
//! let wire = codec
//!     .encode(&message::request("jsonrpc", json!("id-1"), "echo", json!(["Hello!"])))
//!     .unwrap();
//! let decoded = codec.decode(&wire).unwrap();
//! assert!(matches!(classify(&decoded, "jsonrpc"), Inbound::Request(_)));
//! ```

pub mod codec;
pub mod framing;
pub mod protocol;

pub use codec::{BsonCodec, Codec, CodecError, JsonCodec, KeyFn};
pub use framing::{
    BsonFrameCodec, DecodedFrame, JsonRecordCodec, JsonStreamCodec, ParseError, ParseErrorKind,
    DEFAULT_MAX_LEN,
};
pub use protocol::{classify, Inbound, NotificationMsg, RequestMsg, ResponseMsg, RpcError};
