//! JSON-RPC 2.0 error objects.
//!
//! Both the JSON and BSON flavours of the protocol share the error object
//! shape defined by the JSON-RPC 2.0 specification:
//! `{"code": ..., "message": "...", "data": ...}`.
//!
//! # Error Codes
//!
//! Standard JSON-RPC 2.0 error codes:
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//! - `-32000`: Server error

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invalid JSON/BSON was received by the peer
pub const PARSE_ERROR: i32 = -32700;
/// The message is not a valid request object
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist / is not available
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameter(s)
pub const INVALID_PARAMS: i32 = -32602;
/// Internal RPC error
pub const INTERNAL_ERROR: i32 = -32603;
/// Application-defined handler failure
pub const SERVER_ERROR: i32 = -32000;

/// A wire-level RPC error object.
///
/// Carried in the `error` member of a response. `code` and `message` are
/// mandatory; `data` is free-form diagnostic payload.
///
/// # Example
///
/// ```
/// use birpc_common::protocol::RpcError;
/// use serde_json::json;
///
/// let error = RpcError::invalid_params().with_data(json!("expected 1 argument, got 3"));
/// assert_eq!(error.code, -32602);
/// assert_eq!(error.message, "Invalid params");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    /// Error code (standard codes are negative integers)
    pub code: i32,
    /// Short description of the error
    pub message: String,
    /// Additional diagnostic data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error with an arbitrary code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a parse error (-32700).
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    /// Create an invalid request error (-32600).
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    /// Create a method not found error (-32601).
    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
    }

    /// Create an invalid params error (-32602).
    pub fn invalid_params() -> Self {
        Self::new(INVALID_PARAMS, "Invalid params")
    }

    /// Create an internal error (-32603).
    pub fn internal_error() -> Self {
        Self::new(INTERNAL_ERROR, "Internal error")
    }

    /// Create a server error (-32000).
    pub fn server_error() -> Self {
        Self::new(SERVER_ERROR, "Server error")
    }

    /// Attach diagnostic data to the error.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Read an error object out of a decoded message value.
    ///
    /// Returns `None` unless the value is a mapping with an `i32` `code` and
    /// a string `message`, the validity condition for error responses.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let code = i32::try_from(obj.get("code")?.as_i64()?).ok()?;
        let message = obj.get("message")?.as_str()?.to_string();
        Some(Self {
            code,
            message,
            data: obj.get("data").cloned(),
        })
    }
}
