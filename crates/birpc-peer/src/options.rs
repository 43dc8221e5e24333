//! Connection options.
//!
//! Every knob a connection supports, with the defaults the protocol
//! mandates. Options are a plain struct with builder methods; unset event
//! handlers fall back to logging (and, where the protocol says so, closing
//! the connection).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use birpc_common::codec::KeyFn;
use birpc_common::framing::DEFAULT_MAX_LEN;
use birpc_common::protocol::RpcError;

use crate::handlers::HandlerError;
use crate::peer::Peer;

/// Invoked when the inbound stream drains or the peer closes.
pub type ConnectionClosedHandler = Arc<dyn Fn(&Peer) + Send + Sync>;

/// Invoked when the idle timeout elapses with no inbound traffic. The
/// default closes the connection; a custom handler that wants the same must
/// call [`Peer::close`] itself.
pub type IdleTimeoutHandler = Arc<dyn Fn(&Peer) + Send + Sync>;

/// Invoked when a response arrives whose id matches no pending request.
pub type InvalidIdResponseHandler = Arc<dyn Fn(&Peer, &Value) + Send + Sync>;

/// Invoked when the peer reports an error that correlates to no request
/// (an error response with a null id).
pub type NilIdErrorHandler = Arc<dyn Fn(&Peer, &RpcError) + Send + Sync>;

/// Invoked when a notification handler fails or is missing. Notification
/// failures never go on the wire.
pub type NotificationErrorHandler = Arc<dyn Fn(&Peer, &str, &HandlerError) + Send + Sync>;

/// Produces the id for each outbound request. Must yield values unique for
/// the lifetime of the connection; strings and integers are both legal.
pub type IdGenerator = Arc<dyn Fn() -> Value + Send + Sync>;

/// Closes the listening server when a handler requests it.
pub type ServerCloser = Arc<dyn Fn() + Send + Sync>;

/// Framing used by JSON connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonFraming {
    /// No framing: concatenated JSON values split by a streaming parser.
    #[default]
    None,
    /// RFC 7464 JSON text sequences (`0x1E` + JSON + `0x0A`).
    Rfc7464,
}

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_connection_id() -> String {
    format!("conn-{}", CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Options for one connection.
///
/// # Example
///
/// ```
/// use birpc_peer::{JsonFraming, PeerOptions};
/// use std::time::Duration;
///
/// let options = PeerOptions::default()
///     .with_json_framing(JsonFraming::Rfc7464)
///     .with_idle_timeout(Duration::from_secs(30));
/// assert!(options.async_request_handling);
/// ```
#[derive(Clone)]
pub struct PeerOptions {
    /// Run notification handlers on their own tasks. Defaults to false so
    /// notification order is preserved.
    pub async_notification_handling: bool,
    /// Run request handlers on their own tasks. Defaults to true; responses
    /// then go out in handler-completion order.
    pub async_request_handling: bool,
    /// Identifier used in log output. Generated when absent.
    pub connection_id: Option<String>,
    /// Close the connection after this long with no inbound traffic.
    pub idle_timeout: Option<Duration>,
    /// Framing for JSON connections. Ignored by BSON connections.
    pub json_framing: JsonFraming,
    /// Transform applied to every decoded JSON object key.
    pub json_key_fn: Option<KeyFn>,
    /// Largest frame accepted or produced. Defaults to the BSON document
    /// cap (`i32::MAX`). Ignored by frameless JSON connections.
    pub max_len: usize,
    /// Protocol tag key. Defaults to `jsonrpc` or `bsonrpc` per codec.
    pub protocol_keyword: Option<String>,
    /// Outbound request id generator. Defaults to `"id-<n>"` from a
    /// process-wide counter.
    pub id_generator: Option<IdGenerator>,
    /// Handle closed by a handler's close-server control outcome.
    pub server: Option<ServerCloser>,
    pub connection_closed_handler: Option<ConnectionClosedHandler>,
    pub idle_timeout_handler: Option<IdleTimeoutHandler>,
    pub invalid_id_response_handler: Option<InvalidIdResponseHandler>,
    pub nil_id_error_handler: Option<NilIdErrorHandler>,
    pub notification_error_handler: Option<NotificationErrorHandler>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            async_notification_handling: false,
            async_request_handling: true,
            connection_id: None,
            idle_timeout: None,
            json_framing: JsonFraming::default(),
            json_key_fn: None,
            max_len: DEFAULT_MAX_LEN,
            protocol_keyword: None,
            id_generator: None,
            server: None,
            connection_closed_handler: None,
            idle_timeout_handler: None,
            invalid_id_response_handler: None,
            nil_id_error_handler: None,
            notification_error_handler: None,
        }
    }
}

impl PeerOptions {
    pub fn with_async_notification_handling(mut self, enabled: bool) -> Self {
        self.async_notification_handling = enabled;
        self
    }

    pub fn with_async_request_handling(mut self, enabled: bool) -> Self {
        self.async_request_handling = enabled;
        self
    }

    pub fn with_connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_json_framing(mut self, framing: JsonFraming) -> Self {
        self.json_framing = framing;
        self
    }

    pub fn with_json_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.json_key_fn = Some(key_fn);
        self
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_protocol_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.protocol_keyword = Some(keyword.into());
        self
    }

    pub fn with_id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = Some(generator);
        self
    }

    pub fn with_server(mut self, closer: ServerCloser) -> Self {
        self.server = Some(closer);
        self
    }

    pub fn with_connection_closed_handler(mut self, handler: ConnectionClosedHandler) -> Self {
        self.connection_closed_handler = Some(handler);
        self
    }

    pub fn with_idle_timeout_handler(mut self, handler: IdleTimeoutHandler) -> Self {
        self.idle_timeout_handler = Some(handler);
        self
    }

    pub fn with_invalid_id_response_handler(mut self, handler: InvalidIdResponseHandler) -> Self {
        self.invalid_id_response_handler = Some(handler);
        self
    }

    pub fn with_nil_id_error_handler(mut self, handler: NilIdErrorHandler) -> Self {
        self.nil_id_error_handler = Some(handler);
        self
    }

    pub fn with_notification_error_handler(mut self, handler: NotificationErrorHandler) -> Self {
        self.notification_error_handler = Some(handler);
        self
    }
}
