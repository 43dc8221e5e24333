//! Value codecs for encoding/decoding RPC messages.
//!
//! Two codecs share one in-memory representation (`serde_json::Value`):
//!
//! - **[`JsonCodec`]**: UTF-8 JSON bytes, with an optional recursive
//!   object-key transform applied on decode.
//! - **[`BsonCodec`]**: BSON document bytes, bridged through serde so the
//!   same message values flow over either wire format.
//!
//! The [`Codec`] enum dispatches between them.
//!
//! # Example
//!
//! ```
//! use birpc_common::codec::Codec;
//! use serde_json::json;
//!
//! let codec = Codec::json();
//! let message = json!({"jsonrpc": "2.0", "method": "ping"});
//! let encoded = codec.encode(&message).unwrap();
//! assert_eq!(codec.decode(&encoded).unwrap(), message);
//! ```

use std::sync::Arc;

use serde_json::Value;

use crate::protocol::{BSONRPC_KEYWORD, JSONRPC_KEYWORD};

/// Transform applied to every decoded JSON object key.
pub type KeyFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Errors raised while encoding or decoding message values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON encoding error: {0}")]
    BsonEncode(#[from] bson::ser::Error),

    #[error("BSON decoding error: {0}")]
    BsonDecode(#[from] bson::de::Error),
}

/// Codec for encoding/decoding RPC message values.
#[derive(Clone)]
pub enum Codec {
    /// UTF-8 JSON values
    Json(JsonCodec),
    /// BSON documents
    Bson(BsonCodec),
}

impl Codec {
    /// Create a JSON codec with the default (identity) key transform.
    pub fn json() -> Self {
        Codec::Json(JsonCodec::new())
    }

    /// Create a BSON codec.
    pub fn bson() -> Self {
        Codec::Bson(BsonCodec)
    }

    /// Encode a message value to wire bytes.
    pub fn encode(&self, message: &Value) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Json(codec) => codec.encode(message),
            Codec::Bson(codec) => codec.encode(message),
        }
    }

    /// Decode wire bytes into a message value.
    pub fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
        match self {
            Codec::Json(codec) => codec.decode(data),
            Codec::Bson(codec) => codec.decode(data),
        }
    }

    /// The default protocol keyword for this codec.
    pub fn protocol_keyword(&self) -> &'static str {
        match self {
            Codec::Json(_) => JSONRPC_KEYWORD,
            Codec::Bson(_) => BSONRPC_KEYWORD,
        }
    }
}

/// JSON codec.
///
/// Decoding optionally rewrites object keys (recursively) through a
/// caller-supplied transform; encoding emits compact UTF-8 JSON.
#[derive(Clone, Default)]
pub struct JsonCodec {
    key_fn: Option<KeyFn>,
}

impl JsonCodec {
    /// Create a codec with the identity key transform.
    pub fn new() -> Self {
        Self { key_fn: None }
    }

    /// Create a codec that rewrites every decoded object key.
    pub fn with_key_fn(key_fn: KeyFn) -> Self {
        Self {
            key_fn: Some(key_fn),
        }
    }

    /// Encode a message value to UTF-8 JSON bytes.
    pub fn encode(&self, message: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(message)?)
    }

    /// Decode UTF-8 JSON bytes into a message value.
    pub fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
        let value = serde_json::from_slice(data)?;
        Ok(self.transform(value))
    }

    /// Apply the key transform to an already-decoded value.
    pub fn transform(&self, value: Value) -> Value {
        match &self.key_fn {
            None => value,
            Some(key_fn) => transform_keys(value, key_fn.as_ref()),
        }
    }
}

fn transform_keys(value: Value, key_fn: &(dyn Fn(&str) -> String + Send + Sync)) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (key_fn(&k), transform_keys(v, key_fn)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| transform_keys(v, key_fn))
                .collect(),
        ),
        other => other,
    }
}

/// BSON codec.
///
/// Messages travel as single BSON documents. The document's own
/// little-endian length prefix makes each encoded message self-delimiting,
/// so the encoded bytes double as the wire frame.
#[derive(Clone, Copy, Default)]
pub struct BsonCodec;

impl BsonCodec {
    /// Encode a message value to BSON document bytes.
    pub fn encode(&self, message: &Value) -> Result<Vec<u8>, CodecError> {
        let doc = bson::to_document(message)?;
        let mut out = Vec::new();
        doc.to_writer(&mut out)?;
        Ok(out)
    }

    /// Decode BSON document bytes into a message value.
    pub fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
        let doc = bson::Document::from_reader(data)?;
        Ok(serde_json::to_value(doc).map_err(CodecError::Json)?)
    }
}
