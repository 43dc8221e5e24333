//! Outbound request tracking.
//!
//! Every outbound request parks a single-shot delivery slot in the pending
//! table under its id. The dispatcher fills the slot when the correlated
//! response arrives; the caller removes it on timeout; teardown drains the
//! whole table, delivering a closed outcome to every waiter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use birpc_common::protocol::RpcError;

/// Global counter behind the default id generator.
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate the default request id, `"id-<n>"` from a process-wide counter.
///
/// Uniqueness is only required within a single connection's lifetime, so a
/// process-wide counter is more than enough.
pub fn next_default_id() -> Value {
    let n = REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    Value::String(format!("id-{n}"))
}

/// What a waiter receives through its delivery slot.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The peer answered with `result`.
    Result(Value),
    /// The peer answered with an error object.
    Error(RpcError),
    /// A correlated message arrived that is neither a result nor a valid
    /// error object.
    Unknown(Value),
    /// The connection went away before an answer arrived.
    Closed,
}

/// Error raised to a request caller.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The peer answered with an error response.
    #[error("peer error {code}: {message}")]
    Peer {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    /// The connection closed before (or instead of) an answer.
    #[error("connection closed")]
    Closed,

    /// The outbound queue refused the message.
    #[error("outbound buffer overflow")]
    BufferOverflow,

    /// No response arrived within the caller's deadline.
    #[error("response timeout")]
    Timeout,

    /// A correlated message arrived with an unrecognizable shape.
    #[error("unrecognized response shape")]
    Unknown(Value),
}

impl Outcome {
    pub(crate) fn into_result(self) -> Result<Value, RequestError> {
        match self {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(e) => Err(RequestError::Peer {
                code: e.code,
                message: e.message,
                data: e.data,
            }),
            Outcome::Unknown(value) => Err(RequestError::Unknown(value)),
            Outcome::Closed => Err(RequestError::Closed),
        }
    }
}

/// The pending-response table: request id -> single-shot delivery slot.
///
/// Ids are keyed by their JSON rendering so string and integer ids cannot
/// collide.
#[derive(Default)]
pub(crate) struct PendingResponses {
    slots: Mutex<HashMap<String, oneshot::Sender<Outcome>>>,
}

fn slot_key(id: &Value) -> String {
    id.to_string()
}

impl PendingResponses {
    /// Park a new slot under `id` and hand back the receiving end.
    pub(crate) fn insert(&self, id: &Value) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.slots
            .lock()
            .expect("pending table poisoned")
            .insert(slot_key(id), tx);
        rx
    }

    /// Remove the slot for `id`, e.g. when the caller gives up waiting.
    pub(crate) fn remove(&self, id: &Value) -> bool {
        self.slots
            .lock()
            .expect("pending table poisoned")
            .remove(&slot_key(id))
            .is_some()
    }

    /// Deliver `outcome` to the waiter for `id`. Returns false when no slot
    /// is parked under that id (late or stray response).
    pub(crate) fn deliver(&self, id: &Value, outcome: Outcome) -> bool {
        let slot = self
            .slots
            .lock()
            .expect("pending table poisoned")
            .remove(&slot_key(id));
        match slot {
            // A dropped receiver means the caller stopped waiting; that
            // still counts as a known id.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drain every slot, delivering the closed outcome.
    pub(crate) fn drain_closed(&self) {
        let slots = std::mem::take(&mut *self.slots.lock().expect("pending table poisoned"));
        for (_, tx) in slots {
            let _ = tx.send(Outcome::Closed);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().expect("pending table poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_ids_are_unique_and_prefixed() {
        let a = next_default_id();
        let b = next_default_id();
        assert_ne!(a, b);
        assert!(a.as_str().unwrap().starts_with("id-"));
    }

    #[test]
    fn test_string_and_integer_ids_do_not_collide() {
        assert_ne!(slot_key(&json!(1)), slot_key(&json!("1")));
    }

    #[tokio::test]
    async fn test_deliver_fills_exactly_one_waiter() {
        let pending = PendingResponses::default();
        let rx = pending.insert(&json!("id-1"));

        assert!(pending.deliver(&json!("id-1"), Outcome::Result(json!(42))));
        assert_eq!(rx.await.unwrap().into_result().unwrap(), json!(42));

        // The slot is gone afterwards.
        assert!(!pending.deliver(&json!("id-1"), Outcome::Result(json!(0))));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_drain_delivers_closed_to_every_waiter() {
        let pending = PendingResponses::default();
        let rx1 = pending.insert(&json!("a"));
        let rx2 = pending.insert(&json!("b"));
        pending.drain_closed();

        assert!(matches!(rx1.await.unwrap(), Outcome::Closed));
        assert!(matches!(rx2.await.unwrap(), Outcome::Closed));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_removed_slot_makes_response_unknown() {
        let pending = PendingResponses::default();
        let _rx = pending.insert(&json!("id-9"));
        assert!(pending.remove(&json!("id-9")));
        assert!(!pending.deliver(&json!("id-9"), Outcome::Result(json!(1))));
    }

    #[test]
    fn test_outcome_marshalling() {
        assert!(matches!(
            Outcome::Closed.into_result(),
            Err(RequestError::Closed)
        ));
        let err = Outcome::Error(RpcError::method_not_found())
            .into_result()
            .unwrap_err();
        let RequestError::Peer { code, message, .. } = err else {
            panic!("expected peer error");
        };
        assert_eq!(code, -32601);
        assert_eq!(message, "Method not found");
    }
}
