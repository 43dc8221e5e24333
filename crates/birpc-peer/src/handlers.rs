//! Handler tables and handler outcomes.
//!
//! A connection carries two method tables: request handlers (their return
//! value is marshalled into a response) and notification handlers (no
//! response, failures go to the connection's notification error handler).
//! Handlers are async closures over [`Params`]; a handler signals shutdown
//! by returning a control outcome instead of throwing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use birpc_common::protocol::RpcError;

use crate::peer::Peer;

/// Positional parameters handed to a handler.
///
/// The wire value is kept verbatim - it is usually an array but the engine
/// does not insist on it. Typed handlers pull their arguments out with
/// [`Params::parse`]; a shape or arity mismatch becomes an invalid-params
/// failure whose diagnostic travels in the response's `data`.
///
/// # Example
///
/// ```
/// use birpc_peer::Params;
/// use serde_json::json;
///
/// let params = Params::new(json!(["Hello!", 3]));
/// let (text, count): (String, u32) = params.parse().unwrap();
/// assert_eq!((text.as_str(), count), ("Hello!", 3));
/// ```
#[derive(Debug, Clone)]
pub struct Params(Value);

impl Params {
    /// Wrap a raw params value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Deserialize the positional parameters into a tuple (or any other
    /// shape `T` can take).
    ///
    /// The error carries serde's diagnostic, which for tuples includes the
    /// expected and received arity.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.0.clone()).map_err(|e| HandlerError::InvalidParams(e.to_string()))
    }

    /// The parameter at `index`, when params is an array.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.as_array().and_then(|items| items.get(index))
    }

    /// Number of positional parameters (zero when params is not an array).
    pub fn len(&self) -> usize {
        self.0.as_array().map_or(0, Vec::len)
    }

    /// True when there are no positional parameters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw params value.
    pub fn into_inner(self) -> Value {
        self.0
    }
}

/// Shutdown requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Close this connection.
    CloseConnection,
    /// Close the listening server (via the connection's server closer).
    CloseServer,
    /// Close both.
    CloseAll,
}

/// A failed (or deliberately shutdown-signalling) handler outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// Parameter shape/arity mismatch; answered with -32602.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Any other handler failure; answered with -32000.
    #[error("handler failed: {0}")]
    Failed(String),

    /// Shutdown request. In a request context the optional `response` is
    /// delivered as the call's result before the action executes.
    #[error("handler requested {action:?}")]
    Control {
        action: ControlAction,
        response: Option<Value>,
    },
}

impl HandlerError {
    /// A plain handler failure.
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    /// Close this connection after responding with `response`.
    pub fn close_connection(response: Option<Value>) -> Self {
        HandlerError::Control {
            action: ControlAction::CloseConnection,
            response,
        }
    }

    /// Close the server after responding with `response`.
    pub fn close_server(response: Option<Value>) -> Self {
        HandlerError::Control {
            action: ControlAction::CloseServer,
            response,
        }
    }

    /// Close both the connection and the server after responding.
    pub fn close_connection_and_server(response: Option<Value>) -> Self {
        HandlerError::Control {
            action: ControlAction::CloseAll,
            response,
        }
    }

    /// The wire error object for this failure. Control outcomes have no
    /// wire form; callers split them off before converting.
    pub(crate) fn to_rpc_error(&self) -> RpcError {
        match self {
            HandlerError::InvalidParams(detail) => {
                RpcError::invalid_params().with_data(Value::String(detail.clone()))
            }
            HandlerError::Failed(detail) => {
                RpcError::server_error().with_data(Value::String(detail.clone()))
            }
            HandlerError::Control { .. } => RpcError::internal_error(),
        }
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Boxed request handler: params in, result value (or failure) out.
pub type RequestHandler = Arc<dyn Fn(Params) -> BoxFuture<Result<Value, HandlerError>> + Send + Sync>;

/// Boxed notification handler.
pub type NotificationHandler =
    Arc<dyn Fn(Params) -> BoxFuture<Result<(), HandlerError>> + Send + Sync>;

/// Method tables for one connection.
///
/// # Example
///
/// ```
/// use birpc_peer::{Handlers, Params};
/// use serde_json::json;
///
/// let handlers = Handlers::new().request("echo", |params: Params| async move {
///     let (s,): (String,) = params.parse()?;
///     Ok(json!(s.chars().rev().collect::<String>()))
/// });
/// assert!(handlers.has_request("echo"));
/// ```
#[derive(Clone, Default)]
pub struct Handlers {
    requests: HashMap<String, RequestHandler>,
    notifications: HashMap<String, NotificationHandler>,
}

impl Handlers {
    /// An empty handler table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler under `method`.
    pub fn request<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.requests
            .insert(method.into(), Arc::new(move |params| Box::pin(handler(params))));
        self
    }

    /// Register a notification handler under `method`.
    pub fn notification<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.notifications
            .insert(method.into(), Arc::new(move |params| Box::pin(handler(params))));
        self
    }

    /// True when a request handler is registered under `method`.
    pub fn has_request(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    /// True when a notification handler is registered under `method`.
    pub fn has_notification(&self, method: &str) -> bool {
        self.notifications.contains_key(method)
    }

    pub(crate) fn request_handler(&self, method: &str) -> Option<RequestHandler> {
        self.requests.get(method).cloned()
    }

    pub(crate) fn notification_handler(&self, method: &str) -> Option<NotificationHandler> {
        self.notifications.get(method).cloned()
    }
}

/// Source of a connection's handler tables: either a finished table or a
/// [`HandlerFactory`] invoked once during connection setup.
pub trait IntoHandlers {
    fn into_handlers(self, peer: &Peer) -> Handlers;
}

impl IntoHandlers for Handlers {
    fn into_handlers(self, _peer: &Peer) -> Handlers {
        self
    }
}

/// A handler-table factory.
///
/// The wrapped closure runs once during connection setup and receives the
/// connection handle, so the handlers it builds can close over the
/// connection and call the remote end back.
///
/// # Example
///
/// ```
/// use birpc_peer::{HandlerFactory, Handlers, Params, Peer};
/// use serde_json::json;
///
/// let factory = HandlerFactory(|peer: &Peer| {
///     let peer = peer.clone();
///     Handlers::new().request("fanout", move |params: Params| {
///         let peer = peer.clone();
///         async move {
///             peer.notify("progress", json!(["starting"]));
///             Ok(json!("done"))
///         }
///     })
/// });
/// ```
pub struct HandlerFactory<F>(pub F);

impl<F> IntoHandlers for HandlerFactory<F>
where
    F: FnOnce(&Peer) -> Handlers,
{
    fn into_handlers(self, peer: &Peer) -> Handlers {
        (self.0)(peer)
    }
}
