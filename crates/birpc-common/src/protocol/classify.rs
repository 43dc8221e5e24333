//! Message classification.
//!
//! A decoded value is sorted into exactly one of the protocol's message
//! classes. Classification is purely structural; it never consults
//! connection state. Anything that fails every predicate is a schema error,
//! which the dispatcher reports back to the peer when the message at least
//! resembles a request.

use serde_json::Value;

use super::error::RpcError;

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A request: protocol tag, string `method`, and an `id` key holding a
    /// string, integer or null.
    Request(RequestMsg),
    /// A notification: like a request but without an `id` key.
    Notification(NotificationMsg),
    /// A response (success or error) correlated by a non-null `id`.
    Response(ResponseMsg),
    /// An error response with a null `id`; peers use this to report parse
    /// errors that could not be correlated to any request.
    NilIdError(RpcError),
    /// Anything that matches none of the above. The original value is kept
    /// so the dispatcher can echo it back in an invalid-request response.
    SchemaError(Value),
}

/// An inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMsg {
    /// Request id: string, integer or null.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Positional parameters. Absent `params` decodes as null; the value is
    /// not validated to be an array.
    pub params: Value,
}

/// An inbound notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMsg {
    /// Method name.
    pub method: String,
    /// Positional parameters, as for [`RequestMsg`].
    pub params: Value,
}

/// An inbound response, success or error.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMsg {
    /// Correlation id: string or integer, never null.
    pub id: Value,
    /// `Ok(result)` for success responses, `Err(error)` for error responses.
    pub outcome: Result<Value, RpcError>,
}

/// True for the id values permitted on requests: string, integer or null.
fn is_request_id(value: &Value) -> bool {
    match value {
        Value::String(_) | Value::Null => true,
        Value::Number(n) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}

/// True for the id values permitted on responses: string or integer.
fn is_response_id(value: &Value) -> bool {
    !value.is_null() && is_request_id(value)
}

/// Classify a decoded message under the given protocol keyword.
///
/// The predicates are applied in order (request, notification, success
/// response, error response, nil-id error response), so every value lands in
/// exactly one class.
///
/// # Example
///
/// ```
/// use birpc_common::protocol::{classify, Inbound};
/// use serde_json::json;
///
/// let msg = json!({"jsonrpc": "2.0", "method": "m"});
/// assert!(matches!(classify(&msg, "jsonrpc"), Inbound::Notification(_)));
/// ```
pub fn classify(message: &Value, protocol_keyword: &str) -> Inbound {
    let Some(obj) = message.as_object() else {
        return Inbound::SchemaError(message.clone());
    };

    let tagged = obj
        .get(protocol_keyword)
        .and_then(Value::as_str)
        .is_some_and(|v| v == super::message::PROTOCOL_VERSION);
    if !tagged {
        return Inbound::SchemaError(message.clone());
    }

    let method = obj.get("method").and_then(Value::as_str);
    let id = obj.get("id");
    let params = obj.get("params").cloned().unwrap_or(Value::Null);

    if let Some(method) = method {
        match id {
            Some(id) if is_request_id(id) => {
                return Inbound::Request(RequestMsg {
                    id: id.clone(),
                    method: method.to_string(),
                    params,
                });
            }
            Some(_) => return Inbound::SchemaError(message.clone()),
            None => {
                return Inbound::Notification(NotificationMsg {
                    method: method.to_string(),
                    params,
                });
            }
        }
    }

    let result = obj.get("result");
    let error = obj.get("error").map(RpcError::from_value);
    match (id, result, error) {
        (Some(id), Some(result), None) if is_response_id(id) => Inbound::Response(ResponseMsg {
            id: id.clone(),
            outcome: Ok(result.clone()),
        }),
        (Some(id), None, Some(Some(error))) if is_response_id(id) => {
            Inbound::Response(ResponseMsg {
                id: id.clone(),
                outcome: Err(error),
            })
        }
        (Some(Value::Null), None, Some(Some(error))) => Inbound::NilIdError(error),
        _ => Inbound::SchemaError(message.clone()),
    }
}
