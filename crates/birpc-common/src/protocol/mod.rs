//! Protocol layer: message shapes, error objects and classification.
//!
//! The wire protocol is JSON-RPC 2.0, optionally spoken over BSON documents
//! with a `bsonrpc` tag instead of `jsonrpc`. Messages are heterogeneous
//! mappings; this module provides:
//!
//! - [`message`] - builders for the four wire shapes (request, notification,
//!   success response, error response)
//! - [`error`] - the wire error object and the standard error codes
//! - [`classify`] - the structural partition of decoded values into message
//!   classes
//!
//! # Example
//!
//! ```
//! use birpc_common::protocol::{classify, message, Inbound};
//! use serde_json::json;
//!
//! let wire = message::request("jsonrpc", json!("id-1"), "echo", json!(["hi"]));
//! assert!(matches!(classify(&wire, "jsonrpc"), Inbound::Request(_)));
//! ```

pub mod classify;
pub mod error;
pub mod message;

#[cfg(test)]
mod tests;

pub use classify::{classify, Inbound, NotificationMsg, RequestMsg, ResponseMsg};
pub use error::{
    RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    SERVER_ERROR,
};
pub use message::{BSONRPC_KEYWORD, JSONRPC_KEYWORD, PROTOCOL_VERSION};
