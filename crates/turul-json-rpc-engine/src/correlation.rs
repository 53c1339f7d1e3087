//! Outstanding call bookkeeping.
//!
//! Each outgoing request gets the next id from a per-instance counter and a
//! oneshot channel whose receiver is handed back to the caller. Replies are
//! matched by id and complete the channel exactly once; an unmatched reply
//! is handed back to the caller untouched.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{
    error::{CallError, JsonRpcErrorObject},
    request::{JsonRpcRequest, RequestParams},
    types::RequestId,
};

type Completion = oneshot::Sender<Result<Value, CallError>>;

/// Largest id that still travels as a JSON number; the counter wraps to 1
/// after it
const MAX_CALL_ID: u64 = i64::MAX as u64;

/// Pending calls of one engine, keyed by correlation id
pub struct CorrelationTable {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Completion>>,
}

impl CorrelationTable {
    /// `first_id` is clamped to `1..=i64::MAX`; ids are always positive
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id.clamp(1, MAX_CALL_ID)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an id, build the request and register its completion
    pub fn issue(
        &self,
        method: impl Into<String>,
        params: Option<RequestParams>,
    ) -> (u64, JsonRpcRequest, PendingResponse) {
        let id = self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id >= MAX_CALL_ID { 1 } else { id + 1 })
            })
            .unwrap_or_else(|id| id);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = JsonRpcRequest::new(RequestId::from(id), method, params);
        (id, request, PendingResponse { id, rx })
    }

    /// Complete the call `id` with a result.
    ///
    /// When no call with that id is outstanding the result is handed back so
    /// the caller can report it.
    pub fn resolve(&self, id: u64, result: Value) -> Result<(), Value> {
        match self.take(id) {
            Some(tx) => {
                // The caller may have dropped its PendingResponse; the entry
                // is gone either way.
                let _ = tx.send(Ok(result));
                Ok(())
            }
            None => Err(result),
        }
    }

    /// Complete the call `id` with the peer's error, or hand it back if no
    /// such call is outstanding.
    pub fn reject(&self, id: u64, error: JsonRpcErrorObject) -> Result<(), JsonRpcErrorObject> {
        match self.take(id) {
            Some(tx) => {
                let _ = tx.send(Err(CallError::Rpc(error)));
                Ok(())
            }
            None => Err(error),
        }
    }

    fn take(&self, id: u64) -> Option<Completion> {
        self.pending.lock().remove(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.lock().contains_key(&id)
    }
}

/// Awaitable result of an outgoing call
#[derive(Debug)]
#[must_use = "the call's result is only observable by awaiting the PendingResponse"]
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Result<Value, CallError>>,
}

impl PendingResponse {
    /// Correlation id of the request this response answers
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_issue_then_resolve() {
        let table = CorrelationTable::new(1);
        let (id, request, pending) = table.issue("hello", None);

        assert_eq!(id, 1);
        assert_eq!(request.id, RequestId::Number(1));
        assert_eq!(request.method, "hello");
        assert!(table.is_pending(id));

        assert!(table.resolve(id, json!("Hello world")).is_ok());
        assert_eq!(pending.await, Ok(json!("Hello world")));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_carries_peer_error() {
        let table = CorrelationTable::new(1);
        let (id, _, pending) = table.issue("missing", None);

        assert!(table.reject(id, JsonRpcErrorObject::method_not_found("missing")).is_ok());
        let error = pending.await.unwrap_err();
        assert_eq!(error.code(), Some(-32601));
    }

    #[test]
    fn test_unknown_id_is_reported() {
        let table = CorrelationTable::new(1);
        assert_eq!(table.resolve(999, json!({"late": true})), Err(json!({"late": true})));
        assert_eq!(
            table.reject(999, JsonRpcErrorObject::unknown_error()),
            Err(JsonRpcErrorObject::unknown_error())
        );
    }

    #[test]
    fn test_second_reply_for_same_id_is_unexpected() {
        let table = CorrelationTable::new(1);
        let (id, _, _pending) = table.issue("once", None);
        assert!(table.resolve(id, json!(1)).is_ok());
        assert_eq!(table.resolve(id, json!(2)), Err(json!(2)));
    }

    #[tokio::test]
    async fn test_dropped_table_closes_pending_calls() {
        let table = CorrelationTable::new(1);
        let (_, _, pending) = table.issue("never", None);
        drop(table);
        assert_eq!(pending.await, Err(CallError::Closed));
    }

    #[test]
    fn test_first_id_is_positive() {
        let table = CorrelationTable::new(0);
        let (id, _, _pending) = table.issue("x", None);
        assert_eq!(id, 1);
    }

    #[test]
    fn test_ids_stay_json_numbers_at_the_top_of_the_range() {
        let table = CorrelationTable::new(u64::MAX);
        let (last, request, _last_pending) = table.issue("x", None);
        assert_eq!(last, MAX_CALL_ID);
        assert_eq!(request.id, RequestId::Number(i64::MAX));
        assert_eq!(request.id.call_id(), Some(last));

        let (wrapped, request, _wrapped_pending) = table.issue("y", None);
        assert_eq!(wrapped, 1);
        assert_eq!(request.id, RequestId::Number(1));
    }

    #[test]
    fn test_ids_unique_under_concurrent_issue() {
        let table = Arc::new(CorrelationTable::new(1));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| {
                            let (id, _, _pending) = table.issue("x", None);
                            id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for thread in threads {
            for id in thread.join().unwrap() {
                assert!(seen.insert(id), "id {} issued twice", id);
            }
        }
        assert_eq!(seen.len(), 2000);
        assert_eq!(table.pending_count(), 2000);
    }
}
