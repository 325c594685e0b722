//! Bridge event system.
//!
//! Provides a callback-based observability layer for the dispatch bridge.
//! Implement [`BridgeEventHandler`] to receive real-time notifications about:
//!
//! - **Server lifecycle**: listener startup and shutdown
//! - **Peer lifecycle**: connection, last-connection-wins displacement, loss
//! - **Dispatches**: sends, completions, timeouts
//! - **Cancellation sweeps**: pending requests failed on peer loss/shutdown
//!
//! Both methods have default no-op implementations, so handlers only override
//! the events they care about. The handler is wrapped in
//! `Arc<dyn BridgeEventHandler>` and shared with the bridge's I/O task.
//!
//! # Example
//!
//! ```rust,no_run
//! use aibridge::event::{BridgeEvent, BridgeEventHandler};
//! use async_trait::async_trait;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl BridgeEventHandler for Logger {
//!     async fn on_bridge_event(&self, event: &BridgeEvent) {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

use async_trait::async_trait;

/// Events emitted by the dispatch bridge and tool surface.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// The WebSocket listener is accepting connections.
    ServerStarted {
        /// Host the listener is bound to.
        host: String,
        /// Port the listener is bound to.
        port: u16,
    },

    /// The WebSocket listener has shut down.
    ServerStopped,

    /// An extension peer completed its handshake and became the active peer.
    PeerConnected {
        /// Remote address of the peer socket.
        addr: String,
    },

    /// A live peer was displaced by a newer connection (close 1000/"Replaced").
    PeerReplaced {
        /// Remote address of the displaced peer.
        old_addr: String,
        /// Remote address of the peer that took over.
        new_addr: String,
    },

    /// The active peer disconnected (clean close, read error, or timeout).
    PeerDisconnected {
        /// Human-readable reason for the loss.
        reason: String,
    },

    /// A dispatch frame was written to the peer.
    DispatchSent {
        /// Correlation ID of the request.
        request_id: u64,
        /// Trace ID attached to the dispatch, if any.
        trace_id: Option<String>,
    },

    /// A dispatch completed with a peer reply.
    DispatchCompleted {
        /// Correlation ID of the request.
        request_id: u64,
        /// Wall time from send to reply, in milliseconds.
        elapsed_ms: f64,
    },

    /// A dispatch was failed locally because its deadline expired.
    DispatchTimedOut {
        /// Correlation ID of the request.
        request_id: u64,
        /// The deadline that expired, in seconds.
        timeout_secs: f64,
    },

    /// Pending requests were failed en masse.
    RequestsCancelled {
        /// Number of requests swept.
        count: usize,
        /// Reason carried into each failure.
        reason: String,
    },

    /// A surface tool finished executing.
    ToolExecuted {
        /// Name of the tool (e.g. `"execute_script"`).
        tool_name: String,
        /// `false` when the response carried an error.
        success: bool,
    },
}

/// Trait for receiving bridge events.
///
/// The default implementation is a no-op, so implementors only handle the
/// variants they need. The `Send + Sync` bound allows sharing the handler
/// across the I/O task and caller tasks via `Arc<dyn BridgeEventHandler>`;
/// internal state must use its own synchronization.
#[async_trait]
pub trait BridgeEventHandler: Send + Sync {
    /// Called for every bridge event.
    async fn on_bridge_event(&self, _event: &BridgeEvent) {}
}
