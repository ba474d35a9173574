//! Request-id correlation: responses may return out of order and are
//! matched back to their caller by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::protocol::JsonRpcResponse;

/// Issues strictly increasing request ids and tracks the oneshot sender
/// each awaiting caller is blocked on.
#[derive(Clone)]
pub struct PendingRequests {
    next_id: Arc<AtomicU64>,
    inflight: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reserves the next id (strictly increasing within a client's
    /// lifetime) and registers a waiter for its response.
    pub async fn register(&self) -> (u64, oneshot::Receiver<JsonRpcResponse>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inflight.lock().await.insert(id, tx);
        (id, rx)
    }

    /// Delivers a response to its waiting caller, if one is still pending.
    pub async fn resolve(&self, response: JsonRpcResponse) {
        if let Some(id) = response.id_u64() {
            if let Some(tx) = self.inflight.lock().await.remove(&id) {
                let _ = tx.send(response);
            }
        }
    }

    /// Purges a single waiter without delivering a response (used on
    /// per-operation timeout expiry).
    pub async fn purge(&self, id: u64) {
        self.inflight.lock().await.remove(&id);
    }

    /// Drops every pending waiter, e.g. when the transport disconnects.
    /// Receivers observe a closed channel and surface it as a connection
    /// error.
    pub async fn fail_all(&self) {
        self.inflight.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let pending = PendingRequests::new();
        let (id1, _rx1) = pending.register().await;
        let (id2, _rx2) = pending.register().await;
        assert!(id2 > id1);
    }

    #[tokio::test]
    async fn resolve_delivers_to_matching_waiter() {
        let pending = PendingRequests::new();
        let (id, rx) = pending.register().await;
        let response = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: Some(serde_json::Value::from(id)),
            result: Some(serde_json::json!({"ok": true})),
            error: None,
        };
        pending.resolve(response).await;
        let got = rx.await.unwrap();
        assert_eq!(got.id_u64(), Some(id));
    }

    #[tokio::test]
    async fn fail_all_closes_pending_receivers() {
        let pending = PendingRequests::new();
        let (_id, rx) = pending.register().await;
        pending.fail_all().await;
        assert!(rx.await.is_err());
    }
}
