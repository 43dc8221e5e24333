//! birpc Integration Tests
//!
//! End-to-end tests driving two connected peers over in-memory duplex
//! streams: request/response round trips, handler failures, handler-driven
//! shutdown, bidirectional notifications, timeouts and the wire-level
//! parse-error policy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use birpc_peer::{
    connect_bson_rpc, connect_json_rpc, HandlerError, HandlerFactory, Handlers, JsonFraming,
    Params, Peer, PeerOptions, RequestError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn echo_handlers() -> Handlers {
    Handlers::new().request("echo", |params: Params| async move {
        let (s,): (String,) = params.parse()?;
        Ok(json!(s.chars().rev().collect::<String>()))
    })
}

/// Two JSON peers over an in-memory pipe.
fn json_pair(server_handlers: impl birpc_peer::IntoHandlers) -> (Peer, Peer) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client = connect_json_rpc(a, Handlers::new(), PeerOptions::default());
    let server = connect_json_rpc(b, server_handlers, PeerOptions::default());
    (client, server)
}

// ============================================================================
// Request/response round trips
// ============================================================================

#[tokio::test]
async fn test_echo_reverse() {
    init_tracing();
    let (client, _server) = json_pair(echo_handlers());

    let result = client.request("echo", json!(["Hello!"])).await.unwrap();
    assert_eq!(result, json!("!olleH"));
}

#[tokio::test]
async fn test_arity_error_is_invalid_params() {
    let (client, _server) = json_pair(echo_handlers());

    let err = client
        .request("echo", json!(["a", "b", "c"]))
        .await
        .unwrap_err();
    let RequestError::Peer {
        code,
        message,
        data,
    } = err
    else {
        panic!("expected peer error, got {err:?}");
    };
    assert_eq!(code, -32602);
    assert_eq!(message, "Invalid params");
    let diagnostic = data.unwrap();
    assert!(
        diagnostic.as_str().unwrap().contains("length"),
        "diagnostic was: {diagnostic}"
    );
}

#[tokio::test]
async fn test_method_not_found() {
    let (client, _server) = json_pair(echo_handlers());

    let err = client.request("nope", json!(["x"])).await.unwrap_err();
    let RequestError::Peer { code, message, .. } = err else {
        panic!("expected peer error, got {err:?}");
    };
    assert_eq!(code, -32601);
    assert_eq!(message, "Method not found");
}

#[tokio::test]
async fn test_handler_failure_is_server_error() {
    let handlers = Handlers::new().request("boom", |_params: Params| async move {
        Err::<Value, _>(HandlerError::failed("database unreachable"))
    });
    let (client, _server) = json_pair(handlers);

    let err = client.request("boom", json!([])).await.unwrap_err();
    let RequestError::Peer { code, data, .. } = err else {
        panic!("expected peer error, got {err:?}");
    };
    assert_eq!(code, -32000);
    assert_eq!(data, Some(json!("database unreachable")));
}

#[tokio::test]
async fn test_panicking_handler_is_server_error() {
    let handlers = Handlers::new().request("panic", |_params: Params| async move {
        assert!(false, "unexpected state");
        Ok(Value::Null)
    });
    let (client, _server) = json_pair(handlers);

    let err = client.request("panic", json!([])).await.unwrap_err();
    let RequestError::Peer { code, data, .. } = err else {
        panic!("expected peer error, got {err:?}");
    };
    assert_eq!(code, -32000);
    assert_eq!(data, Some(json!("unexpected state")));
}

#[tokio::test]
async fn test_requests_flow_both_directions() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client_handlers = Handlers::new()
        .request("ping", |_params: Params| async move { Ok(json!("pong")) });
    let client = connect_json_rpc(a, client_handlers, PeerOptions::default());
    let server = connect_json_rpc(b, echo_handlers(), PeerOptions::default());

    assert_eq!(
        client.request("echo", json!(["ab"])).await.unwrap(),
        json!("ba")
    );
    assert_eq!(server.request("ping", json!([])).await.unwrap(), json!("pong"));
}

// ============================================================================
// Handler-initiated shutdown
// ============================================================================

#[tokio::test]
async fn test_handler_initiated_close() {
    let handlers = echo_handlers().request("exit", |_params: Params| async move {
        Err::<Value, _>(HandlerError::close_connection(Some(json!("ack!"))))
    });
    let (client, _server) = json_pair(handlers);

    // The response is delivered before the connection goes away.
    let result = client.request("exit", json!([])).await.unwrap();
    assert_eq!(result, json!("ack!"));

    client.closed().await;
    let err = client.request("echo", json!(["x"])).await.unwrap_err();
    assert!(matches!(err, RequestError::Closed), "got {err:?}");
}

#[tokio::test]
async fn test_close_server_control_outcome() {
    let closed = Arc::new(AtomicUsize::new(0));
    let closed_probe = Arc::clone(&closed);

    let handlers = Handlers::new().request("shutdown", |_params: Params| async move {
        Err::<Value, _>(HandlerError::close_connection_and_server(None))
    });
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client = connect_json_rpc(a, Handlers::new(), PeerOptions::default());
    let _server = connect_json_rpc(
        b,
        handlers,
        PeerOptions::default().with_server(Arc::new(move || {
            closed_probe.fetch_add(1, Ordering::SeqCst);
        })),
    );

    assert_eq!(
        client.request("shutdown", json!([])).await.unwrap(),
        Value::Null
    );
    client.closed().await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_bidirectional_notifications_preserve_order() {
    let (a, b) = tokio::io::duplex(64 * 1024);

    let received = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&received);
    let client_handlers = Handlers::new().notification("note", move |params: Params| {
        let sink = Arc::clone(&sink);
        async move {
            let (ch,): (String,) = params.parse()?;
            sink.lock().unwrap().push(ch);
            Ok(())
        }
    });
    let client = connect_json_rpc(a, client_handlers, PeerOptions::default());

    // The server handler calls the client back while computing its answer,
    // so its table is built from a factory that captures the connection.
    let _server = connect_json_rpc(
        b,
        HandlerFactory(|peer: &Peer| {
            let peer = peer.clone();
            Handlers::new().request("process", move |params: Params| {
                let peer = peer.clone();
                async move {
                    let (msg,): (String,) = params.parse()?;
                    for ch in msg.chars() {
                        peer.notify("note", json!([ch.to_string()]));
                    }
                    Ok(json!("Done!"))
                }
            })
        }),
        PeerOptions::default(),
    );

    let result = client.request("process", json!(["Whammy!"])).await.unwrap();
    assert_eq!(result, json!("Done!"));
    assert_eq!(
        *received.lock().unwrap(),
        vec!["W", "h", "a", "m", "m", "y", "!"]
    );
}

#[tokio::test]
async fn test_unhandled_notification_reaches_error_handler() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let failures = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&failures);

    let client = connect_json_rpc(a, Handlers::new(), PeerOptions::default());
    let _server = connect_json_rpc(
        b,
        Handlers::new(),
        PeerOptions::default().with_notification_error_handler(Arc::new(
            move |_peer, method, _error| {
                assert_eq!(method, "unknown");
                probe.fetch_add(1, Ordering::SeqCst);
            },
        )),
    );

    assert!(client.notify("unknown", json!([])));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Timeouts and teardown
// ============================================================================

#[tokio::test]
async fn test_request_timeout_and_late_response() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let stray = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&stray);

    let client = connect_json_rpc(
        a,
        Handlers::new(),
        PeerOptions::default().with_invalid_id_response_handler(Arc::new(move |_peer, _msg| {
            probe.fetch_add(1, Ordering::SeqCst);
        })),
    );
    let _server = connect_json_rpc(
        b,
        Handlers::new().request("slow", |_params: Params| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("late"))
        }),
        PeerOptions::default(),
    );

    let err = client
        .request_with_timeout(Duration::from_millis(50), "slow", json!([]))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Timeout), "got {err:?}");

    // The late response finds no pending slot and goes to the stray-response
    // handler instead.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(stray.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_fails_pending_requests() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client = connect_json_rpc(a, Handlers::new(), PeerOptions::default());
    let _server = connect_json_rpc(
        b,
        Handlers::new().request("hang", |_params: Params| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }),
        PeerOptions::default(),
    );

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.request("hang", json!([])).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, RequestError::Closed), "got {err:?}");
}

#[tokio::test]
async fn test_idle_timeout_closes_connection() {
    let (a, b) = tokio::io::duplex(1024);
    let client = connect_json_rpc(
        a,
        Handlers::new(),
        PeerOptions::default().with_idle_timeout(Duration::from_millis(100)),
    );
    // Keep the far end open but silent.
    let _silent = b;

    tokio::time::timeout(Duration::from_secs(2), client.closed())
        .await
        .expect("idle timeout should close the connection");
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_notify_after_close_returns_false() {
    let (a, _b) = tokio::io::duplex(1024);
    let client = connect_json_rpc(a, Handlers::new(), PeerOptions::default());
    assert!(client.notify("m", json!([])));
    client.close();
    assert!(!client.notify("m", json!([])));
}

// ============================================================================
// Other wire formats
// ============================================================================

#[tokio::test]
async fn test_echo_over_bson() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client = connect_bson_rpc(a, Handlers::new(), PeerOptions::default());
    let _server = connect_bson_rpc(b, echo_handlers(), PeerOptions::default());

    let result = client.request("echo", json!(["Hello!"])).await.unwrap();
    assert_eq!(result, json!("!olleH"));
}

#[tokio::test]
async fn test_echo_over_rfc7464_records() {
    let options = || PeerOptions::default().with_json_framing(JsonFraming::Rfc7464);
    let (a, b) = tokio::io::duplex(64 * 1024);
    let client = connect_json_rpc(a, Handlers::new(), options());
    let _server = connect_json_rpc(b, echo_handlers(), options());

    let result = client.request("echo", json!(["Hello!"])).await.unwrap();
    assert_eq!(result, json!("!olleH"));
}

// ============================================================================
// Wire-level error policy
// ============================================================================

/// Read one JSON value from the raw side of the pipe.
async fn read_json(read: &mut (impl AsyncReadExt + Unpin)) -> Value {
    let mut buf = vec![0u8; 4096];
    let n = read.read(&mut buf).await.unwrap();
    assert!(n > 0, "stream closed before a message arrived");
    serde_json::from_slice(&buf[..n]).unwrap()
}

#[tokio::test]
async fn test_invalid_json_gets_nil_id_parse_error_then_close() {
    let (a, b) = tokio::io::duplex(1024);
    let peer = connect_json_rpc(a, Handlers::new(), PeerOptions::default());
    let (mut read, mut write) = tokio::io::split(b);

    write.write_all(b"{]").await.unwrap();

    let response = read_json(&mut read).await;
    assert_eq!(response["error"]["code"], json!(-32700));
    assert!(response["id"].is_null());

    // Frameless parse faults are irrecoverable: the peer closes.
    tokio::time::timeout(Duration::from_secs(2), peer.closed())
        .await
        .expect("peer should close after an unrecoverable parse error");
    let mut rest = Vec::new();
    read.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_schema_error_gets_invalid_request_and_connection_survives() {
    let (a, b) = tokio::io::duplex(1024);
    let peer = connect_json_rpc(a, Handlers::new(), PeerOptions::default());
    let (mut read, mut write) = tokio::io::split(b);

    // Request-shaped but with a non-string method.
    write
        .write_all(br#"{"jsonrpc":"2.0","method":42,"id":9}"#)
        .await
        .unwrap();
    let response = read_json(&mut read).await;
    assert_eq!(response["error"]["code"], json!(-32600));
    assert_eq!(response["id"], json!(9));

    // The connection keeps dispatching afterwards.
    write
        .write_all(br#"{"jsonrpc":"2.0","method":"still-there","id":10}"#)
        .await
        .unwrap();
    let response = read_json(&mut read).await;
    assert_eq!(response["error"]["code"], json!(-32601));
    assert_eq!(response["id"], json!(10));
    assert!(!peer.is_closed());
}

#[tokio::test]
async fn test_nil_id_error_from_peer_reaches_handler() {
    let (a, b) = tokio::io::duplex(1024);
    let reported = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&reported);
    let _peer = connect_json_rpc(
        a,
        Handlers::new(),
        PeerOptions::default().with_nil_id_error_handler(Arc::new(move |_peer, error| {
            assert_eq!(error.code, -32700);
            probe.fetch_add(1, Ordering::SeqCst);
        })),
    );
    let (_read, mut write) = tokio::io::split(b);

    write
        .write_all(br#"{"jsonrpc":"2.0","error":{"code":-32700,"message":"Parse error"},"id":null}"#)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reported.load(Ordering::SeqCst), 1);
}
