//! Correlates outstanding LSP request ids with the API callers waiting on
//! them.
//!
//! Invariant: no two concurrent requests share an id; for every pending
//! entry there is exactly one awaiting caller. The pending map's own lock
//! is never held across an `.await` — allocation, insertion, and delivery
//! are each a single synchronous critical section.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use broker_core::error::Error;
use broker_core::telemetry::metrics;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

/// An error the LSP server reported in a JSON-RPC `error` object.
#[derive(Debug, Clone)]
pub struct LspFault {
    pub code: i64,
    pub message: String,
}

type LspOutcome = Result<Value, LspFault>;

/// Pending-request map plus the monotonic id counter that feeds it.
pub struct RequestRegistry {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<LspOutcome>>>,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self { next_id: AtomicI64::new(1), pending: Mutex::new(HashMap::new()) }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Deliver a response to whoever is waiting on `id`. Non-blocking: the
    /// channel has buffer one, and if the original caller already left
    /// (timed out), the send is a no-op and the result is dropped.
    pub fn complete(&self, id: i64, outcome: LspOutcome) {
        let sender = self.pending.lock().remove(&id);
        if let Some(tx) = sender {
            metrics::PENDING_REQUESTS.decrement();
            let _ = tx.send(outcome);
        }
    }

    /// Allocate an id, hand the request to `write` (which should actually
    /// put it on the wire), then wait for either a response or `deadline`.
    /// The pending entry is cleared on every exit path — success, LSP
    /// error, transport failure, or timeout — so no entry ever leaks.
    pub async fn call<W, Fut>(
        &self,
        method: &str,
        deadline: Duration,
        write: W,
    ) -> broker_core::Result<Value>
    where
        W: FnOnce(i64) -> Fut,
        Fut: Future<Output = broker_core::Result<()>>,
    {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        metrics::PENDING_REQUESTS.increment();
        metrics::LSP_REQUESTS_TOTAL.increment();

        if let Err(e) = write(id).await {
            self.clear(id);
            return Err(e);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(fault))) => Err(Error::LspError { code: fault.code, message: fault.message }),
            Ok(Err(_recv_error)) => {
                self.clear(id);
                Err(Error::TransportFailure("LSP response channel closed".into()))
            }
            Err(_elapsed) => {
                self.clear(id);
                metrics::LSP_TIMEOUTS_TOTAL.increment();
                Err(Error::Timeout { method: method.to_string() })
            }
        }
    }

    fn clear(&self, id: i64) {
        if self.pending.lock().remove(&id).is_some() {
            metrics::PENDING_REQUESTS.decrement();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    /// Scenario 3: 50 concurrent calls, each resolved by its own id, no
    /// cross-talk between callers.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_route_correctly() {
        let registry = Arc::new(RequestRegistry::new());
        let mut handles = Vec::new();

        for marker in 0..50u32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let registry_for_write = registry.clone();
                registry
                    .call("textDocument/hover", Duration::from_secs(3), move |id| {
                        let registry = registry_for_write.clone();
                        async move {
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_millis(100)).await;
                                registry.complete(
                                    id,
                                    Ok(serde_json::json!({"marker": marker})),
                                );
                            });
                            Ok(())
                        }
                    })
                    .await
            }));
        }

        let start = Instant::now();
        for (marker, handle) in handles.into_iter().enumerate() {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value["marker"], marker as u32);
        }
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(registry.pending_count(), 0);
    }

    /// Scenario 4: a request nobody ever answers times out, and does not
    /// leak a pending entry that would block a later request on the same id.
    #[tokio::test(start_paused = true)]
    async fn timeout_clears_pending_entry() {
        let registry = RequestRegistry::new();

        let result = registry
            .call("textDocument/hover", Duration::from_millis(50), |_id| async { Ok(()) })
            .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert_eq!(registry.pending_count(), 0);

        // A late response for the timed-out id must not panic or affect
        // anything; it's simply discarded (no receiver left).
        registry.complete(1, Ok(serde_json::json!({"late": true})));

        // Subsequent calls succeed normally.
        let registry = Arc::new(registry);
        let registry_clone = registry.clone();
        let result = registry
            .call("textDocument/hover", Duration::from_secs(1), move |id| {
                let registry = registry_clone.clone();
                async move {
                    registry.complete(id, Ok(serde_json::json!({"ok": true})));
                    Ok(())
                }
            })
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn write_failure_clears_pending_entry() {
        let registry = RequestRegistry::new();
        let result = registry
            .call("textDocument/hover", Duration::from_secs(1), |_id| async {
                Err(Error::TransportFailure("stdin closed".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(registry.pending_count(), 0);
    }
}
