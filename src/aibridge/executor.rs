//! Script execution API for the tool surface.
//!
//! [`ScriptExecutor`] is the public entry point callers use to run scripts in
//! Illustrator. It layers observability on top of the bridge: a trace ID per
//! dispatch (generated when the caller does not supply one), start/end log
//! lines, wall-time measurement, and the `trace_id`/`elapsed_ms` echoes on
//! the returned response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::aibridge::bridge::WebSocketBridge;
use crate::aibridge::config::BridgeConfig;
use crate::aibridge::errors::{BridgeErrorCode, DISCONNECT_HINT};
use crate::aibridge::registry::CommandMetadata;
use crate::aibridge::response::{format_response, ExecutionResponse};

/// Generate a short trace ID of the form `req_<8 hex chars>`.
pub fn generate_trace_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("req_{}", &hex[..8])
}

/// Public dispatch API over the WebSocket bridge.
pub struct ScriptExecutor {
    bridge: Arc<WebSocketBridge>,
    default_timeout: Duration,
}

impl ScriptExecutor {
    /// Create an executor over the given bridge, taking the default dispatch
    /// timeout from configuration.
    pub fn new(bridge: Arc<WebSocketBridge>, config: &BridgeConfig) -> Self {
        Self {
            bridge,
            default_timeout: Duration::from_secs_f64(config.timeout_seconds),
        }
    }

    /// The bridge this executor dispatches through.
    pub fn bridge(&self) -> Arc<WebSocketBridge> {
        Arc::clone(&self.bridge)
    }

    /// The timeout used when a caller does not supply one.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Execute a script in Illustrator.
    ///
    /// Checks the connection first and returns the standard DISCONNECTED
    /// error (echoing `trace_id`) without dispatching when no peer is
    /// attached. Otherwise submits to the bridge, measures wall time, and
    /// attaches `trace_id` and `elapsed_ms` to the returned response.
    pub async fn execute(
        &self,
        script: &str,
        timeout: Option<Duration>,
        command: Option<CommandMetadata>,
        trace_id: Option<String>,
    ) -> ExecutionResponse {
        let trace_id = trace_id.unwrap_or_else(generate_trace_id);
        let command_type = command
            .as_ref()
            .map(|c| c.command_type.clone())
            .unwrap_or_else(|| "execute_script".to_string());

        if !self.bridge.is_connected() {
            log::warn!("[{}] {}: refused, no extension connected", trace_id, command_type);
            let mut response =
                ExecutionResponse::from_code(BridgeErrorCode::Disconnected, DISCONNECT_HINT);
            response.trace_id = Some(trace_id);
            return response;
        }

        log::info!("[{}] {}: starting", trace_id, command_type);
        let started = Instant::now();
        let mut response = self
            .bridge
            .send(
                script,
                timeout.unwrap_or(self.default_timeout),
                command,
                Some(trace_id.clone()),
            )
            .await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        if response.is_error() {
            log::info!("[{}] {}: error in {:.1}ms", trace_id, command_type, elapsed_ms);
        } else {
            log::info!(
                "[{}] {}: completed in {:.1}ms",
                trace_id,
                command_type,
                elapsed_ms
            );
        }

        response.trace_id.get_or_insert(trace_id);
        response.elapsed_ms = Some(elapsed_ms);
        response
    }

    /// Execute a script and render the reply through the response formatter.
    ///
    /// This is what the tool surface returns to callers: pretty JSON for
    /// structured results, `Error: ...` for failures, and the prominent
    /// stop-retrying banner for connection errors.
    pub async fn execute_formatted(
        &self,
        script: &str,
        timeout: Option<Duration>,
        command: Option<CommandMetadata>,
        trace_id: Option<String>,
    ) -> String {
        let response = self.execute(script, timeout, command, trace_id).await;
        format_response(&response)
    }
}
