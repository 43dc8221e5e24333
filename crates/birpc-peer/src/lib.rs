//! birpc Peer
//!
//! A symmetric, bidirectional JSON-RPC 2.0 / BSON-RPC peer over any duplex
//! byte stream. Once connected, both endpoints are architecturally
//! identical: either side may send requests, receive responses, or deliver
//! fire-and-forget notifications.
//!
//! # Architecture
//!
//! Per connection this crate runs two tasks:
//!
//! - a **dispatcher** consuming decoded inbound messages in arrival order,
//!   routing them to handlers (requests/notifications) or to the pending
//!   request table (responses), and applying the parse-error policy
//! - a **writer** owning the framed sink, so responses, requests and
//!   notifications from any task funnel through one ordered queue
//!
//! Request handlers run on their own tasks by default (responses leave in
//! completion order); notification handlers run inline by default so their
//! order matches arrival order. Both policies are per-connection options.
//!
//! # Components
//!
//! - [`connect_json_rpc`] / [`connect_bson_rpc`] - connection entry points
//! - [`Peer`] - the connection handle: `request`, `request_with_timeout`,
//!   `notify`, `close`
//! - [`Handlers`] - method tables; handlers signal shutdown by returning a
//!   control outcome ([`HandlerError::close_connection`] and friends)
//! - [`PeerOptions`] - every per-connection knob
//!
//! # Example
//!
//! ```no_run
//! use birpc_peer::{connect_json_rpc, Handlers, Params, PeerOptions};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let handlers = Handlers::new().request("echo", |params: Params| async move {
//!     let (s,): (String,) = params.parse()?;
//!     Ok(json!(s.chars().rev().collect::<String>()))
//! });
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:6000").await?;
//! let peer = connect_json_rpc(stream, handlers, PeerOptions::default());
//!
//! let result = peer.request("echo", json!(["Hello!"])).await?;
//! assert_eq!(result, json!("!olleH"));
//! # Ok(())
//! # }
//! ```

mod dispatch;
pub mod handlers;
pub mod options;
pub mod outbound;
pub mod peer;

pub use handlers::{
    ControlAction, HandlerError, HandlerFactory, Handlers, IntoHandlers, NotificationHandler,
    Params, RequestHandler,
};
pub use options::{
    ConnectionClosedHandler, IdGenerator, IdleTimeoutHandler, InvalidIdResponseHandler,
    JsonFraming, NilIdErrorHandler, NotificationErrorHandler, PeerOptions, ServerCloser,
};
pub use outbound::{next_default_id, RequestError};
pub use peer::{connect_bson_rpc, connect_json_rpc, Peer};

pub use birpc_common::protocol::RpcError;
