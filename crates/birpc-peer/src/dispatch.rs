//! The inbound dispatcher.
//!
//! One dispatcher task per connection consumes the framed inbound stream in
//! arrival order. Requests and notifications are routed to the handler
//! tables (inline or on their own tasks, per the connection options),
//! responses are correlated with pending requests, parse errors are answered
//! with a nil-id parse-error response and, when irrecoverable, tear the
//! connection down. Teardown always drains the pending table so every
//! waiter observes a closed outcome.

use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio_util::codec::{Decoder, FramedRead};

use birpc_common::framing::{DecodedFrame, ParseError, ParseErrorKind};
use birpc_common::protocol::{
    classify, message, Inbound, NotificationMsg, RequestMsg, ResponseMsg, RpcError,
};

use crate::handlers::{ControlAction, HandlerError, Handlers, Params};
use crate::options::{
    ConnectionClosedHandler, IdleTimeoutHandler, InvalidIdResponseHandler, NilIdErrorHandler,
    NotificationErrorHandler, PeerOptions,
};
use crate::outbound::Outcome;
use crate::peer::{OutgoingFrame, Peer};

/// Everything the dispatcher needs to route one connection's traffic.
pub(crate) struct Engine {
    peer: Peer,
    handlers: Handlers,
    async_request_handling: bool,
    async_notification_handling: bool,
    idle_timeout: Option<Duration>,
    connection_closed_handler: Option<ConnectionClosedHandler>,
    idle_timeout_handler: Option<IdleTimeoutHandler>,
    invalid_id_response_handler: Option<InvalidIdResponseHandler>,
    nil_id_error_handler: Option<NilIdErrorHandler>,
    notification_error_handler: Option<NotificationErrorHandler>,
}

/// What the read side produced for one dispatcher turn.
enum NextItem {
    /// The idle timeout elapsed with no inbound traffic.
    TimedOut,
    /// The byte source drained.
    Drained,
    /// The transport failed.
    TransportError(io::Error),
    /// A decoded frame (message or in-band parse error).
    Frame(DecodedFrame),
}

impl Engine {
    pub(crate) fn new(peer: Peer, handlers: Handlers, options: &PeerOptions) -> Self {
        Self {
            peer,
            handlers,
            async_request_handling: options.async_request_handling,
            async_notification_handling: options.async_notification_handling,
            idle_timeout: options.idle_timeout,
            connection_closed_handler: options.connection_closed_handler.clone(),
            idle_timeout_handler: options.idle_timeout_handler.clone(),
            invalid_id_response_handler: options.invalid_id_response_handler.clone(),
            nil_id_error_handler: options.nil_id_error_handler.clone(),
            notification_error_handler: options.notification_error_handler.clone(),
        }
    }

    fn conn(&self) -> &str {
        self.peer.connection_id()
    }

    fn keyword(&self) -> &str {
        self.peer.protocol_keyword()
    }

    /// Queue a message for the writer. Failure means the writer is gone, so
    /// the connection is closed.
    async fn send(&self, message: Value) -> Result<(), ()> {
        self.peer
            .outgoing_tx()
            .send(OutgoingFrame::plain(message))
            .await
            .map_err(|_| self.peer.close())
    }

    /// Queue a message and wait until the writer has actually put it on the
    /// wire. Used for responses that precede a shutdown action.
    async fn send_and_flush(&self, message: Value) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let frame = OutgoingFrame {
            message,
            sent: Some(ack_tx),
        };
        if self.peer.outgoing_tx().send(frame).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    fn on_idle_timeout(&self) -> bool {
        match &self.idle_timeout_handler {
            Some(handler) => {
                handler(&self.peer);
                !self.peer.is_closed()
            }
            None => {
                tracing::info!(connection_id = %self.conn(), "idle timeout, closing connection");
                false
            }
        }
    }

    fn on_drained(&self) {
        tracing::debug!(connection_id = %self.conn(), "byte source drained");
        if let Some(handler) = &self.connection_closed_handler {
            handler(&self.peer);
        }
    }

    async fn on_parse_error(&self, error: ParseError) -> bool {
        if error.kind == ParseErrorKind::TrailingGarbage {
            tracing::warn!(connection_id = %self.conn(), %error, "discarding trailing bytes");
            return true;
        }
        tracing::warn!(connection_id = %self.conn(), %error, "parse error");
        let response = message::error_response(
            self.keyword(),
            Value::Null,
            &RpcError::parse_error().with_data(Value::String(error.describe())),
        );
        if self.send(response).await.is_err() {
            return false;
        }
        error.recoverable
    }

    /// Apply the request handler and send the marshalled response.
    async fn run_request(&self, request: RequestMsg) {
        tracing::debug!(connection_id = %self.conn(), method = %request.method, "handling request");
        let (response, action) = match self.handlers.request_handler(&request.method) {
            None => (
                message::error_response(self.keyword(), request.id, &RpcError::method_not_found()),
                None,
            ),
            Some(handler) => {
                let outcome = AssertUnwindSafe(handler(Params::new(request.params)))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(result)) => (
                        message::success_response(self.keyword(), request.id, result),
                        None,
                    ),
                    Ok(Err(HandlerError::Control { action, response })) => (
                        message::success_response(
                            self.keyword(),
                            request.id,
                            response.unwrap_or(Value::Null),
                        ),
                        Some(action),
                    ),
                    Ok(Err(error)) => (
                        message::error_response(self.keyword(), request.id, &error.to_rpc_error()),
                        None,
                    ),
                    Err(panic) => (
                        message::error_response(
                            self.keyword(),
                            request.id,
                            &RpcError::server_error()
                                .with_data(Value::String(panic_message(panic.as_ref()))),
                        ),
                        None,
                    ),
                }
            }
        };
        match action {
            None => {
                let _ = self.send(response).await;
            }
            Some(action) => {
                // The shutdown takes effect only after the response is on
                // the wire.
                self.send_and_flush(response).await;
                self.apply_control(action);
            }
        }
    }

    /// Apply the notification handler. Failures never go on the wire.
    async fn run_notification(&self, notification: NotificationMsg) {
        tracing::debug!(connection_id = %self.conn(), method = %notification.method, "handling notification");
        let Some(handler) = self.handlers.notification_handler(&notification.method) else {
            let error =
                HandlerError::failed(format!("no handler for notification {:?}", notification.method));
            self.on_notification_error(&notification.method, &error);
            return;
        };
        let outcome = AssertUnwindSafe(handler(Params::new(notification.params)))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(HandlerError::Control { action, .. })) => self.apply_control(action),
            Ok(Err(error)) => self.on_notification_error(&notification.method, &error),
            Err(panic) => self.on_notification_error(
                &notification.method,
                &HandlerError::failed(panic_message(panic.as_ref())),
            ),
        }
    }

    fn on_response(&self, response: ResponseMsg, raw: &Value) {
        let outcome = match response.outcome {
            Ok(result) => Outcome::Result(result),
            Err(error) => Outcome::Error(error),
        };
        if !self.peer.pending().deliver(&response.id, outcome) {
            tracing::warn!(
                connection_id = %self.conn(),
                id = %response.id,
                "response for unknown request id"
            );
            if let Some(handler) = &self.invalid_id_response_handler {
                handler(&self.peer, raw);
            }
        }
    }

    fn on_nil_id_error(&self, error: RpcError) {
        match &self.nil_id_error_handler {
            Some(handler) => handler(&self.peer, &error),
            None => tracing::warn!(
                connection_id = %self.conn(),
                code = error.code,
                message = %error.message,
                "peer reported an uncorrelated error"
            ),
        }
    }

    /// A message matching no class. Request-shaped ones are answered with an
    /// invalid-request error; response-shaped ones fail their waiter.
    async fn on_schema_error(&self, value: Value) -> bool {
        tracing::warn!(connection_id = %self.conn(), message = %value, "message failed schema validation");
        let obj = value.as_object();
        if obj.is_some_and(|o| o.contains_key("method")) {
            let id = obj
                .and_then(|o| o.get("id"))
                .cloned()
                .unwrap_or(Value::Null);
            let response = message::error_response(
                self.keyword(),
                id,
                &RpcError::invalid_request().with_data(value.clone()),
            );
            return self.send(response).await.is_ok();
        }
        if let Some(id) = obj.and_then(|o| o.get("id")) {
            // The peer answered one of our requests with something that is
            // neither a result nor a valid error object.
            self.peer.pending().deliver(id, Outcome::Unknown(value.clone()));
        }
        true
    }

    fn on_notification_error(&self, method: &str, error: &HandlerError) {
        match &self.notification_error_handler {
            Some(handler) => handler(&self.peer, method, error),
            None => tracing::error!(
                connection_id = %self.conn(),
                method,
                %error,
                "notification handler failed"
            ),
        }
    }

    fn apply_control(&self, action: ControlAction) {
        tracing::debug!(connection_id = %self.conn(), ?action, "handler requested shutdown");
        match action {
            ControlAction::CloseConnection => self.peer.close(),
            ControlAction::CloseServer => self.close_server(),
            ControlAction::CloseAll => {
                self.close_server();
                self.peer.close();
            }
        }
    }

    fn close_server(&self) {
        match self.peer.server_closer() {
            Some(closer) => closer(),
            None => tracing::warn!(connection_id = %self.conn(), "no server handle to close"),
        }
    }
}

/// Route one decoded frame. Returns false when the dispatcher must stop.
async fn handle_frame(engine: &Arc<Engine>, frame: DecodedFrame) -> bool {
    let value = match frame {
        DecodedFrame::ParseError(error) => return engine.on_parse_error(error).await,
        DecodedFrame::Message(value) => value,
    };
    match classify(&value, engine.keyword()) {
        Inbound::Request(request) => {
            if engine.async_request_handling {
                let engine = Arc::clone(engine);
                tokio::spawn(async move { engine.run_request(request).await });
                true
            } else {
                engine.run_request(request).await;
                !engine.peer.is_closed()
            }
        }
        Inbound::Notification(notification) => {
            if engine.async_notification_handling {
                let engine = Arc::clone(engine);
                tokio::spawn(async move { engine.run_notification(notification).await });
                true
            } else {
                engine.run_notification(notification).await;
                !engine.peer.is_closed()
            }
        }
        Inbound::Response(response) => {
            engine.on_response(response, &value);
            true
        }
        Inbound::NilIdError(error) => {
            engine.on_nil_id_error(error);
            true
        }
        Inbound::SchemaError(_) => engine.on_schema_error(value).await,
    }
}

/// The dispatcher task: consume the inbound stream until it drains, the
/// connection is closed, or an irrecoverable error is met. Always drains the
/// pending table on the way out.
pub(crate) async fn run<R, C>(mut inbound: FramedRead<R, C>, engine: Engine)
where
    R: AsyncRead + Unpin + Send + 'static,
    C: Decoder<Item = DecodedFrame, Error = io::Error> + Send + 'static,
{
    let engine = Arc::new(engine);
    let cancel = engine.peer.cancel_token();
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = next_item(&mut inbound, engine.idle_timeout) => item,
        };
        match item {
            NextItem::TimedOut => {
                if !engine.on_idle_timeout() {
                    break;
                }
            }
            NextItem::Drained => {
                engine.on_drained();
                break;
            }
            NextItem::TransportError(error) => {
                tracing::warn!(connection_id = %engine.conn(), %error, "transport error");
                break;
            }
            NextItem::Frame(frame) => {
                if !handle_frame(&engine, frame).await {
                    break;
                }
            }
        }
    }
    engine.peer.close();
    engine.peer.pending().drain_closed();
    tracing::debug!(connection_id = %engine.conn(), "dispatcher stopped");
}

async fn next_item<R, C>(inbound: &mut FramedRead<R, C>, idle_timeout: Option<Duration>) -> NextItem
where
    R: AsyncRead + Unpin,
    C: Decoder<Item = DecodedFrame, Error = io::Error>,
{
    let result = match idle_timeout {
        Some(deadline) => match tokio::time::timeout(deadline, inbound.next()).await {
            Ok(result) => result,
            Err(_) => return NextItem::TimedOut,
        },
        None => inbound.next().await,
    };
    match result {
        None => NextItem::Drained,
        Some(Ok(frame)) => NextItem::Frame(frame),
        Some(Err(error)) => NextItem::TransportError(error),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}
