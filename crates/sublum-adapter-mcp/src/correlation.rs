//! The in-flight request table correlating upstream responses back to the
//! call that produced them (spec.md §5: "a single lock held only to insert
//! or remove an entry, never while forwarding bytes").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

/// Canonical string key for a JSON-RPC id. `Value`'s `Display` renders a
/// JSON string id with its quotes and a numeric id without them, so the
/// string `"1"` and the number `1` never collide.
#[must_use]
pub fn id_key(id: &Value) -> String {
    id.to_string()
}

/// What the upstream-reader task needs once a response with this id
/// arrives.
pub struct PendingCall {
    /// Identifier unique within the run.
    pub call_id: String,
    /// Upstream server name.
    pub server_name: String,
    /// Tool name.
    pub tool_name: String,
    /// When the call was forwarded, for `latency_ms`.
    pub started_at: Instant,
    /// Delivers the upstream response's raw bytes back to the task awaiting
    /// it, verbatim — forwarded responses are written as-received from
    /// upstream, never re-serialized.
    pub reply: oneshot::Sender<Vec<u8>>,
}

/// Table of calls forwarded to upstream and not yet answered.
#[derive(Default)]
pub struct CorrelationTable {
    inner: Mutex<HashMap<String, PendingCall>>,
}

impl CorrelationTable {
    /// Register a forwarded call under `id`'s key.
    pub fn insert(&self, id: &Value, pending: PendingCall) {
        self.inner.lock().expect("correlation table poisoned").insert(id_key(id), pending);
    }

    /// Remove and return the pending call matching `id`, if any. Called
    /// once per response; a second response with the same id (or one with
    /// no matching request) finds nothing, which the adapter treats as
    /// `SUB-P004 UnmatchedResponseId`.
    pub fn take(&self, id: &Value) -> Option<PendingCall> {
        self.inner.lock().expect("correlation table poisoned").remove(&id_key(id))
    }

    /// Number of calls currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("correlation table poisoned").len()
    }

    /// `true` if no calls are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every pending call, e.g. at shutdown, so waiters don't hang on
    /// a response that will never arrive.
    pub fn drain(&self) -> Vec<PendingCall> {
        self.inner.lock().expect("correlation table poisoned").drain().map(|(_, v)| v).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> (PendingCall, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingCall {
                call_id: "call-1".into(),
                server_name: "git".into(),
                tool_name: "git_push".into(),
                started_at: Instant::now(),
                reply: tx,
            },
            rx,
        )
    }

    #[test]
    fn string_and_numeric_ids_do_not_collide() {
        let table = CorrelationTable::default();
        let (p1, _r1) = pending();
        let (p2, _r2) = pending();
        table.insert(&serde_json::json!(1), p1);
        table.insert(&serde_json::json!("1"), p2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn take_removes_the_entry() {
        let table = CorrelationTable::default();
        let (p, _r) = pending();
        let id = serde_json::json!(42);
        table.insert(&id, p);
        assert!(table.take(&id).is_some());
        assert!(table.take(&id).is_none());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn reply_channel_delivers_response_to_waiter() {
        let table = CorrelationTable::default();
        let (p, rx) = pending();
        let id = serde_json::json!(1);
        table.insert(&id, p);
        let found = table.take(&id).expect("present");
        found.reply.send(br#"{"result":"ok"}"#.to_vec()).unwrap();
        let got = rx.await.unwrap();
        assert_eq!(got, br#"{"result":"ok"}"#.to_vec());
    }

    #[test]
    fn drain_empties_the_table() {
        let table = CorrelationTable::default();
        let (p1, _r1) = pending();
        let (p2, _r2) = pending();
        table.insert(&serde_json::json!(1), p1);
        table.insert(&serde_json::json!(2), p2);
        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
