//! The connection context and entry points.
//!
//! [`connect_json_rpc`] / [`connect_bson_rpc`] take an already-established
//! duplex byte stream (TCP, TLS, an in-memory pipe - anything
//! `AsyncRead + AsyncWrite`), wire up the framing, spawn the dispatcher and
//! writer tasks, and hand back a [`Peer`]: a cheaply cloneable handle for
//! issuing requests and notifications to the remote end.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use birpc_common::codec::JsonCodec;
use birpc_common::framing::{BsonFrameCodec, DecodedFrame, JsonRecordCodec, JsonStreamCodec};
use birpc_common::protocol::{message, BSONRPC_KEYWORD, JSONRPC_KEYWORD};

use crate::dispatch::{self, Engine};
use crate::handlers::IntoHandlers;
use crate::options::{next_connection_id, IdGenerator, JsonFraming, PeerOptions, ServerCloser};
use crate::outbound::{next_default_id, Outcome, PendingResponses, RequestError};

/// Messages queued for the writer before a connection starts shedding load.
const OUTBOUND_QUEUE_LIMIT: usize = 64;

/// One message bound for the wire. When `sent` is present the writer
/// acknowledges through it after the sink accepted the bytes.
pub(crate) struct OutgoingFrame {
    pub(crate) message: Value,
    pub(crate) sent: Option<oneshot::Sender<()>>,
}

impl OutgoingFrame {
    pub(crate) fn plain(message: Value) -> Self {
        Self {
            message,
            sent: None,
        }
    }
}

struct Shared {
    connection_id: String,
    protocol_keyword: String,
    outgoing_tx: mpsc::Sender<OutgoingFrame>,
    pending: PendingResponses,
    id_generator: IdGenerator,
    cancel: CancellationToken,
    server: Option<ServerCloser>,
}

/// Handle to one live connection.
///
/// Cloning is cheap; every clone addresses the same connection. The handle
/// stays valid after the connection closes - operations then fail with
/// [`RequestError::Closed`].
///
/// # Example
///
/// ```no_run
/// use birpc_peer::{connect_json_rpc, Handlers, PeerOptions};
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = tokio::net::TcpStream::connect("127.0.0.1:6000").await?;
/// let peer = connect_json_rpc(stream, Handlers::new(), PeerOptions::default());
///
/// let reversed = peer.request("echo", json!(["Hello!"])).await?;
/// assert_eq!(reversed, json!("!olleH"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Peer {
    shared: Arc<Shared>,
}

impl Peer {
    /// Send a request and wait for the correlated response.
    ///
    /// `params` is the positional parameter sequence, normally a JSON array.
    ///
    /// # Errors
    ///
    /// [`RequestError::Peer`] when the remote end answers with an error,
    /// [`RequestError::Closed`] when the connection goes away first, and
    /// [`RequestError::BufferOverflow`] when the outbound queue is full.
    pub async fn request(
        &self,
        method: impl AsRef<str>,
        params: Value,
    ) -> Result<Value, RequestError> {
        let (_id, rx) = self.send_request(method.as_ref(), params)?;
        match rx.await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(RequestError::Closed),
        }
    }

    /// Like [`Peer::request`], but give up after `timeout`.
    ///
    /// On timeout the pending slot is removed, so a response arriving later
    /// is routed to the connection's invalid-id response handler.
    pub async fn request_with_timeout(
        &self,
        timeout: Duration,
        method: impl AsRef<str>,
        params: Value,
    ) -> Result<Value, RequestError> {
        let (id, rx) = self.send_request(method.as_ref(), params)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome.into_result(),
            Ok(Err(_)) => Err(RequestError::Closed),
            Err(_) => {
                self.shared.pending.remove(&id);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Send a fire-and-forget notification. Returns whether the message was
    /// accepted for delivery.
    pub fn notify(&self, method: impl AsRef<str>, params: Value) -> bool {
        if self.is_closed() {
            return false;
        }
        let msg = message::notification(&self.shared.protocol_keyword, method.as_ref(), params);
        self.shared
            .outgoing_tx
            .try_send(OutgoingFrame::plain(msg))
            .is_ok()
    }

    /// Close the connection. Pending requests fail with
    /// [`RequestError::Closed`]; queued outbound messages are still flushed.
    pub fn close(&self) {
        if !self.shared.cancel.is_cancelled() {
            tracing::debug!(connection_id = %self.shared.connection_id, "closing connection");
            self.shared.cancel.cancel();
        }
    }

    /// True once the connection is closed or closing.
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// The identifier this connection logs under.
    pub fn connection_id(&self) -> &str {
        &self.shared.connection_id
    }

    /// The protocol tag key this connection speaks (`jsonrpc`/`bsonrpc`
    /// unless overridden).
    pub fn protocol_keyword(&self) -> &str {
        &self.shared.protocol_keyword
    }

    fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(Value, oneshot::Receiver<Outcome>), RequestError> {
        if self.is_closed() {
            return Err(RequestError::Closed);
        }
        let id = (self.shared.id_generator)();
        let rx = self.shared.pending.insert(&id);
        let msg = message::request(&self.shared.protocol_keyword, id.clone(), method, params);
        if let Err(refused) = self.shared.outgoing_tx.try_send(OutgoingFrame::plain(msg)) {
            self.shared.pending.remove(&id);
            return Err(match refused {
                mpsc::error::TrySendError::Full(_) => RequestError::BufferOverflow,
                mpsc::error::TrySendError::Closed(_) => RequestError::Closed,
            });
        }
        // Teardown may have drained the table between the insert above and
        // now; a slot parked after the drain would never be filled.
        if self.is_closed() {
            self.shared.pending.remove(&id);
            return Err(RequestError::Closed);
        }
        Ok((id, rx))
    }

    pub(crate) fn outgoing_tx(&self) -> &mpsc::Sender<OutgoingFrame> {
        &self.shared.outgoing_tx
    }

    pub(crate) fn pending(&self) -> &PendingResponses {
        &self.shared.pending
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub(crate) fn server_closer(&self) -> Option<&ServerCloser> {
        self.shared.server.as_ref()
    }
}

/// Connect a JSON-RPC 2.0 peer over `stream`.
///
/// The stream carries either concatenated JSON values (the default) or
/// RFC 7464 records, per [`PeerOptions::json_framing`]. `handlers` is either
/// a finished [`Handlers`](crate::Handlers) table or a
/// [`HandlerFactory`](crate::HandlerFactory), which lets handlers capture
/// the connection and call the remote end back.
pub fn connect_json_rpc<S, H>(stream: S, handlers: H, options: PeerOptions) -> Peer
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: IntoHandlers,
{
    let json_codec = match &options.json_key_fn {
        Some(key_fn) => JsonCodec::with_key_fn(key_fn.clone()),
        None => JsonCodec::new(),
    };
    let keyword = options
        .protocol_keyword
        .clone()
        .unwrap_or_else(|| JSONRPC_KEYWORD.to_string());
    match options.json_framing {
        JsonFraming::None => connect_with_codec(
            stream,
            JsonStreamCodec::new(json_codec),
            keyword,
            handlers,
            options,
        ),
        JsonFraming::Rfc7464 => connect_with_codec(
            stream,
            JsonRecordCodec::new(json_codec, options.max_len),
            keyword,
            handlers,
            options,
        ),
    }
}

/// Connect a BSON-RPC peer over `stream`.
///
/// Messages travel as raw BSON documents back to back; the protocol tag
/// defaults to `bsonrpc`.
pub fn connect_bson_rpc<S, H>(stream: S, handlers: H, options: PeerOptions) -> Peer
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: IntoHandlers,
{
    let keyword = options
        .protocol_keyword
        .clone()
        .unwrap_or_else(|| BSONRPC_KEYWORD.to_string());
    connect_with_codec(
        stream,
        BsonFrameCodec::new(options.max_len),
        keyword,
        handlers,
        options,
    )
}

fn connect_with_codec<S, C, H>(
    stream: S,
    codec: C,
    protocol_keyword: String,
    handlers: H,
    options: PeerOptions,
) -> Peer
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    C: Decoder<Item = DecodedFrame, Error = std::io::Error>
        + Encoder<Value, Error = std::io::Error>
        + Clone
        + Send
        + 'static,
    H: IntoHandlers,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let inbound = FramedRead::new(read_half, codec.clone());
    let outbound = FramedWrite::new(write_half, codec);

    let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTBOUND_QUEUE_LIMIT);
    let cancel = CancellationToken::new();
    let connection_id = options
        .connection_id
        .clone()
        .unwrap_or_else(next_connection_id);
    let id_generator = options
        .id_generator
        .clone()
        .unwrap_or_else(|| Arc::new(next_default_id));

    let peer = Peer {
        shared: Arc::new(Shared {
            connection_id: connection_id.clone(),
            protocol_keyword,
            outgoing_tx,
            pending: PendingResponses::default(),
            id_generator,
            cancel: cancel.clone(),
            server: options.server.clone(),
        }),
    };

    // Handler factories run before the dispatcher starts so the tables are
    // complete for the very first inbound message.
    let handlers = handlers.into_handlers(&peer);
    let engine = Engine::new(peer.clone(), handlers, &options);

    tracing::debug!(connection_id = %connection_id, "connection established");
    tokio::spawn(write_loop(outbound, outgoing_rx, cancel, connection_id));
    tokio::spawn(dispatch::run(inbound, engine));
    peer
}

/// The writer task: encode and send queued messages until the connection
/// closes, then flush what is left and shut the sink down.
async fn write_loop<W, C>(
    mut sink: FramedWrite<W, C>,
    mut rx: mpsc::Receiver<OutgoingFrame>,
    cancel: CancellationToken,
    connection_id: String,
) where
    W: AsyncWrite + Unpin,
    C: Encoder<Value, Error = std::io::Error>,
{
    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(error) = sink.send(frame.message).await {
                    tracing::warn!(connection_id = %connection_id, %error, "write failed, closing connection");
                    cancel.cancel();
                    break;
                }
                if let Some(ack) = frame.sent {
                    let _ = ack.send(());
                }
            }
            _ = cancel.cancelled() => {
                // Drain what was queued before the close so responses that
                // precede a shutdown still reach the peer.
                while let Ok(frame) = rx.try_recv() {
                    if sink.send(frame.message).await.is_err() {
                        break;
                    }
                    if let Some(ack) = frame.sent {
                        let _ = ack.send(());
                    }
                }
                break;
            }
        }
    }
    rx.close();
    let _ = sink.close().await;
}
