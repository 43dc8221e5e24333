//! Wire message builders.
//!
//! Messages are plain JSON mappings; the builders here produce the four
//! message shapes under a configurable protocol keyword (`"jsonrpc"` for the
//! JSON flavour, `"bsonrpc"` for the BSON flavour). The protocol version is
//! always the string `"2.0"`.

use serde_json::{Map, Value};

use super::error::RpcError;

/// The protocol version tag required on every message.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Default protocol keyword for the JSON flavour.
pub const JSONRPC_KEYWORD: &str = "jsonrpc";

/// Default protocol keyword for the BSON flavour.
pub const BSONRPC_KEYWORD: &str = "bsonrpc";

fn envelope(protocol_keyword: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(
        protocol_keyword.to_string(),
        Value::String(PROTOCOL_VERSION.to_string()),
    );
    map
}

/// Build a request message.
///
/// `id` may be a string, an integer, or null. `params` is included verbatim
/// unless it is null.
pub fn request(protocol_keyword: &str, id: Value, method: &str, params: Value) -> Value {
    let mut map = envelope(protocol_keyword);
    map.insert("method".to_string(), Value::String(method.to_string()));
    if !params.is_null() {
        map.insert("params".to_string(), params);
    }
    map.insert("id".to_string(), id);
    Value::Object(map)
}

/// Build a notification message. Identical to a request but without `id`.
pub fn notification(protocol_keyword: &str, method: &str, params: Value) -> Value {
    let mut map = envelope(protocol_keyword);
    map.insert("method".to_string(), Value::String(method.to_string()));
    if !params.is_null() {
        map.insert("params".to_string(), params);
    }
    Value::Object(map)
}

/// Build a success response carrying `result`.
pub fn success_response(protocol_keyword: &str, id: Value, result: Value) -> Value {
    let mut map = envelope(protocol_keyword);
    map.insert("result".to_string(), result);
    map.insert("id".to_string(), id);
    Value::Object(map)
}

/// Build an error response.
///
/// Passing `Value::Null` as `id` produces the nil-id form used to report
/// parse errors back to the peer.
pub fn error_response(protocol_keyword: &str, id: Value, error: &RpcError) -> Value {
    let mut map = envelope(protocol_keyword);
    map.insert(
        "error".to_string(),
        serde_json::to_value(error).unwrap_or(Value::Null),
    );
    map.insert("id".to_string(), id);
    Value::Object(map)
}
