//! Request registry for tracking pending WebSocket dispatches.
//!
//! The registry is the single synchronization point between the caller domain
//! (tool handlers awaiting replies) and the I/O domain (the bridge task
//! completing them). It allocates monotonic request IDs, owns the table of
//! outstanding requests, and settles each request's future exactly once.
//! Critical sections cover only map bookkeeping and are never held across
//! I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::aibridge::errors::{BridgeErrorCode, DispatchError};

/// What a pending request's future resolves to: the peer's raw JSON reply,
/// or a locally-generated dispatch failure.
pub type DispatchResult = Result<serde_json::Value, DispatchError>;

/// Optional command context attached to a dispatch for logging/diagnostics.
///
/// Serialized under the wire message's `command` field. The `params` map is
/// diagnostics only — it is never sent for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMetadata {
    /// Short command label, e.g. `"draw_rectangle"`.
    #[serde(rename = "type")]
    pub command_type: String,
    /// Identifier of the calling tool, e.g. `"illustrator_execute_script"`.
    #[serde(rename = "tool")]
    pub tool_name: String,
    /// Sanitized parameter snapshot for debugging.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl CommandMetadata {
    pub fn new(command_type: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            command_type: command_type.into(),
            tool_name: tool_name.into(),
            params: serde_json::Map::new(),
        }
    }

    /// Attach a diagnostic parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// A pending request waiting for the extension's reply.
struct PendingRequest {
    /// Completion side of the caller's future. `Some` until settled.
    tx: Option<oneshot::Sender<DispatchResult>>,
    /// The dispatched script, kept for diagnostics.
    script: String,
    /// Command metadata, if the caller supplied any.
    command: Option<CommandMetadata>,
    /// Trace ID correlating this dispatch across logs.
    trace_id: Option<String>,
}

/// ID counter plus pending table, guarded by one mutex.
struct RegistryInner {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
}

/// Thread-safe table of outstanding dispatches.
///
/// IDs are monotonic starting at 1 and never reused within a bridge
/// lifetime. An entry becomes terminal exactly once: `complete` and `fail`
/// both remove it before settling, so a second completion for the same ID is
/// a no-op returning `false`.
pub struct RequestRegistry {
    inner: Mutex<RegistryInner>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 0,
                pending: HashMap::new(),
            }),
        }
    }

    /// Allocate the next request ID and insert a pending entry for it.
    ///
    /// Returns the ID together with the receiver the caller awaits. Callable
    /// from any thread.
    pub fn create(
        &self,
        script: impl Into<String>,
        command: Option<CommandMetadata>,
        trace_id: Option<String>,
    ) -> (u64, oneshot::Receiver<DispatchResult>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let request_id = inner.next_id;
        inner.pending.insert(
            request_id,
            PendingRequest {
                tx: Some(tx),
                script: script.into(),
                command,
                trace_id,
            },
        );
        (request_id, rx)
    }

    /// Complete a pending request with the peer's reply.
    ///
    /// Returns whether a matching pending request was found. Unknown IDs are
    /// a no-op logged at debug.
    pub fn complete(&self, request_id: u64, result: serde_json::Value) -> bool {
        self.settle(request_id, Ok(result))
    }

    /// Fail a pending request with a dispatch error.
    ///
    /// Returns whether a matching pending request was found.
    pub fn fail(&self, request_id: u64, error: DispatchError) -> bool {
        self.settle(request_id, Err(error))
    }

    fn settle(&self, request_id: u64, outcome: DispatchResult) -> bool {
        let entry = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.pending.remove(&request_id)
        };
        match entry {
            Some(mut pending) => {
                if let Some(tx) = pending.tx.take() {
                    // The receiver may already be gone (caller timed out);
                    // a failed send is the late-reply no-op.
                    let _ = tx.send(outcome);
                }
                log::debug!("Request {} settled", request_id);
                true
            }
            None => {
                log::debug!("Request {} not pending; ignoring", request_id);
                false
            }
        }
    }

    /// Drain the table, failing every pending future with a connection-loss
    /// error carrying `reason`. Returns how many requests were swept.
    ///
    /// Called on peer disconnect and on bridge shutdown.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.pending.drain().collect()
        };
        let count = drained.len();
        for (request_id, mut pending) in drained {
            if let Some(tx) = pending.tx.take() {
                let _ = tx.send(Err(DispatchError::new(
                    BridgeErrorCode::Disconnected,
                    reason.to_string(),
                )));
            }
            log::debug!("Cancelled request {}: {}", request_id, reason);
        }
        count
    }

    /// Number of requests currently outstanding.
    pub fn pending_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.len()
    }

    /// Whether a request ID is still outstanding.
    pub fn contains(&self, request_id: u64) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pending.contains_key(&request_id)
    }

    /// Diagnostic snapshot of a pending request: `(script, command, trace_id)`.
    pub fn describe(&self, request_id: u64) -> Option<(String, Option<CommandMetadata>, Option<String>)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .pending
            .get(&request_id)
            .map(|p| (p.script.clone(), p.command.clone(), p.trace_id.clone()))
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_returns_unique_monotonic_ids() {
        let registry = RequestRegistry::new();
        let (id1, _rx1) = registry.create("a", None, None);
        let (id2, _rx2) = registry.create("b", None, None);
        let (id3, _rx3) = registry.create("c", None, None);
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(id3, 3);
    }

    #[test]
    fn test_trace_id_preserved() {
        let registry = RequestRegistry::new();
        let (id, _rx) = registry.create("s", None, Some("test_trace_123".to_string()));
        let (_, _, trace_id) = registry.describe(id).unwrap();
        assert_eq!(trace_id.as_deref(), Some("test_trace_123"));
    }

    #[tokio::test]
    async fn test_complete_resolves_future() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.create("s", None, None);
        assert!(registry.complete(id, json!({"success": true, "data": "test"})));
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result["data"], "test");
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_complete_unknown_id_is_noop() {
        let registry = RequestRegistry::new();
        assert!(!registry.complete(999, json!({"result": "orphan"})));
    }

    #[tokio::test]
    async fn test_fail_resolves_with_error() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.create("s", None, None);
        assert!(registry.fail(
            id,
            DispatchError::new(BridgeErrorCode::ExecutionError, "Connection lost")
        ));
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.code, BridgeErrorCode::ExecutionError);
    }

    #[tokio::test]
    async fn test_double_settle_is_noop() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.create("s", None, None);
        assert!(registry.complete(id, json!(1)));
        assert!(!registry.complete(id, json!(2)));
        assert!(!registry.fail(
            id,
            DispatchError::new(BridgeErrorCode::Timeout, "late")
        ));
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_cancel_all_drains_every_waiter() {
        let registry = RequestRegistry::new();
        let (_, rx1) = registry.create("a", None, None);
        let (_, rx2) = registry.create("b", None, None);
        let (_, rx3) = registry.create("c", None, None);

        assert_eq!(registry.cancel_all("Shutdown"), 3);
        assert_eq!(registry.pending_count(), 0);

        for rx in [rx1, rx2, rx3] {
            let err = rx.await.unwrap().unwrap_err();
            assert_eq!(err.code, BridgeErrorCode::Disconnected);
            assert_eq!(err.message, "Shutdown");
        }
    }

    #[test]
    fn test_ids_not_reused_after_settle() {
        let registry = RequestRegistry::new();
        let (id1, _rx) = registry.create("a", None, None);
        registry.complete(id1, json!(null));
        let (id2, _rx) = registry.create("b", None, None);
        assert!(id2 > id1);
    }

    #[test]
    fn test_command_metadata_wire_shape() {
        let command = CommandMetadata::new("draw_rectangle", "illustrator_draw_rectangle")
            .with_param("width", json!(100));
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["type"], "draw_rectangle");
        assert_eq!(value["tool"], "illustrator_draw_rectangle");
        assert_eq!(value["params"]["width"], 100);
    }
}
