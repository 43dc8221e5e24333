use serde_json::{json, Value};

use super::classify::{classify, Inbound};
use super::error::RpcError;
use super::message;

fn class_name(inbound: &Inbound) -> &'static str {
    match inbound {
        Inbound::Request(_) => "request",
        Inbound::Notification(_) => "notification",
        Inbound::Response(_) => "response",
        Inbound::NilIdError(_) => "nil-id-error",
        Inbound::SchemaError(_) => "schema-error",
    }
}

#[test]
fn test_request_classification() {
    for id in [json!("id-1"), json!(42), Value::Null] {
        let msg = json!({"jsonrpc": "2.0", "method": "m", "params": [1], "id": id});
        let Inbound::Request(req) = classify(&msg, "jsonrpc") else {
            panic!("expected request for id {id:?}");
        };
        assert_eq!(req.method, "m");
        assert_eq!(req.params, json!([1]));
    }
}

#[test]
fn test_notification_classification() {
    let msg = json!({"jsonrpc": "2.0", "method": "note", "params": ["W"]});
    let Inbound::Notification(n) = classify(&msg, "jsonrpc") else {
        panic!("expected notification");
    };
    assert_eq!(n.method, "note");
}

#[test]
fn test_success_response_classification() {
    let msg = json!({"jsonrpc": "2.0", "result": "!olleH", "id": "id-1"});
    let Inbound::Response(r) = classify(&msg, "jsonrpc") else {
        panic!("expected response");
    };
    assert_eq!(r.outcome, Ok(json!("!olleH")));
}

#[test]
fn test_error_response_classification() {
    let msg = json!({
        "jsonrpc": "2.0",
        "error": {"code": -32601, "message": "Method not found"},
        "id": 9
    });
    let Inbound::Response(r) = classify(&msg, "jsonrpc") else {
        panic!("expected response");
    };
    assert_eq!(r.outcome, Err(RpcError::method_not_found()));
}

#[test]
fn test_nil_id_error_classification() {
    let msg = json!({
        "jsonrpc": "2.0",
        "error": {"code": -32700, "message": "Parse error", "data": "bad bytes"},
        "id": null
    });
    let Inbound::NilIdError(e) = classify(&msg, "jsonrpc") else {
        panic!("expected nil-id error");
    };
    assert_eq!(e.code, -32700);
}

#[test]
fn test_schema_errors() {
    let cases = [
        // not a mapping
        json!([1, 2, 3]),
        json!("hello"),
        // missing or wrong protocol tag
        json!({"method": "m"}),
        json!({"jsonrpc": "1.0", "method": "m"}),
        json!({"jsonrpc": 2.0, "method": "m"}),
        // non-string method with a request-like shape
        json!({"jsonrpc": "2.0", "method": 42, "id": 1}),
        // fractional id
        json!({"jsonrpc": "2.0", "method": "m", "id": 1.5}),
        // response with both result and error
        json!({"jsonrpc": "2.0", "result": 1, "error": {"code": 1, "message": "m"}, "id": 1}),
        // error response with a malformed error object
        json!({"jsonrpc": "2.0", "error": {"code": "x", "message": "m"}, "id": 1}),
        // success response with a null id
        json!({"jsonrpc": "2.0", "result": 1, "id": null}),
    ];
    for msg in cases {
        assert!(
            matches!(classify(&msg, "jsonrpc"), Inbound::SchemaError(_)),
            "expected schema error for {msg}"
        );
    }
}

#[test]
fn test_protocol_keyword_is_respected() {
    let msg = json!({"bsonrpc": "2.0", "method": "m"});
    assert!(matches!(classify(&msg, "bsonrpc"), Inbound::Notification(_)));
    assert!(matches!(classify(&msg, "jsonrpc"), Inbound::SchemaError(_)));
}

#[test]
fn test_partition_is_exhaustive_over_builders() {
    // Every builder output lands in its own class.
    let samples = [
        (
            message::request("jsonrpc", json!(1), "m", json!([])),
            "request",
        ),
        (
            message::notification("jsonrpc", "m", json!([])),
            "notification",
        ),
        (
            message::success_response("jsonrpc", json!(1), json!("ok")),
            "response",
        ),
        (
            message::error_response("jsonrpc", json!(1), &RpcError::server_error()),
            "response",
        ),
        (
            message::error_response("jsonrpc", Value::Null, &RpcError::parse_error()),
            "nil-id-error",
        ),
    ];
    for (msg, expected) in samples {
        assert_eq!(class_name(&classify(&msg, "jsonrpc")), expected, "{msg}");
    }
}
