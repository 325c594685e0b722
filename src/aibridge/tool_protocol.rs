//! Tool protocol seam for the bridge's call surface.
//!
//! The controlling agent reaches the bridge through named tools. This module
//! defines the seam between that surface and its transport: a
//! [`ToolProtocol`] implementation executes tools and describes them, while
//! the HTTP adapter (or any other front end) stays oblivious to what the
//! tools actually do.
//!
//! # Architecture
//!
//! ```text
//! Agent → HTTP adapter → ToolProtocol → ScriptExecutor → WebSocket bridge
//! ```
//!
//! Every tool call bottoms out in a script dispatch (or a local bridge
//! lookup), so [`ToolCallResult`] carries the dispatch's observability
//! echoes — trace ID and wall time — alongside the formatted output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

use crate::aibridge::response::ExecutionResponse;

/// Outcome of one surface tool call.
///
/// `output` is what the agent reads: the formatted script-host reply for
/// dispatching tools, or a structured status object for the local ones.
/// When the call went through the bridge, `trace_id` and `elapsed_ms` echo
/// the underlying dispatch so the agent can correlate against server logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Whether the tool call succeeded.
    pub success: bool,
    /// The output handed back to the agent.
    pub output: serde_json::Value,
    /// Error text when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Trace ID of the underlying dispatch, when one was issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Wall time of the underlying dispatch in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
}

impl ToolCallResult {
    /// A successful call with no dispatch behind it (local lookups).
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            trace_id: None,
            elapsed_ms: None,
        }
    }

    /// A failed call with no dispatch behind it.
    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
            trace_id: None,
            elapsed_ms: None,
        }
    }

    /// Build a result from a dispatch's response and its formatted rendering.
    ///
    /// Success tracks the response; the trace ID and timing are carried over
    /// so they survive into the surface reply.
    pub fn from_dispatch(response: &ExecutionResponse, formatted: String) -> Self {
        let mut result = if response.is_error() {
            Self::failure(formatted)
        } else {
            Self::success(serde_json::Value::String(formatted))
        };
        result.trace_id = response.trace_id.clone();
        result.elapsed_ms = response.elapsed_ms;
        result
    }
}

/// Argument kinds the surface's tools declare.
///
/// Only the kinds this surface actually uses: script source and error text
/// are strings, timeouts are numbers, library includes are arrays, and task
/// payloads are objects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Array,
    Object,
}

/// One declared tool argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: false,
        }
    }

    /// Add a human readable description that surfaces in the tool listing.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Metadata describing one tool in the listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter definition to the tool metadata.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }
}

/// Trait the surface's transport programs against.
#[async_trait]
pub trait ToolProtocol: Send + Sync {
    /// Execute a tool with the given arguments.
    async fn execute(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, Box<dyn Error + Send + Sync>>;

    /// Describe every tool this protocol serves.
    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>>;

    /// Describe one tool by name.
    async fn get_tool_metadata(
        &self,
        tool_name: &str,
    ) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>>;

    /// Protocol identifier (e.g., "illustrator").
    fn protocol_name(&self) -> &str;
}

/// Ways a tool call can fail before anything reaches the script host.
///
/// Transport and script-host failures are not errors at this seam — they
/// come back as failed [`ToolCallResult`]s so the agent sees the formatted
/// message. This type covers only surface-side refusals.
#[derive(Debug, Clone)]
pub enum ToolCallError {
    /// The requested tool name is not part of this surface.
    UnknownTool(String),
    /// The call's arguments are missing or of the wrong shape.
    InvalidArguments(String),
    /// Assembling the script failed (library resolution, payload encoding).
    Composition(String),
}

impl fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCallError::UnknownTool(name) => write!(f, "Unknown tool: {}", name),
            ToolCallError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            ToolCallError::Composition(msg) => write!(f, "Script composition failed: {}", msg),
        }
    }
}

impl Error for ToolCallError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_constructors() {
        let ok = ToolCallResult::success(json!({"value": 1}));
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert!(ok.trace_id.is_none());

        let failed = ToolCallResult::failure("boom".to_string());
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_from_dispatch_carries_trace_and_timing() {
        let response = ExecutionResponse {
            result: Some(json!(2)),
            trace_id: Some("req_deadbeef".to_string()),
            elapsed_ms: Some(12.5),
            ..ExecutionResponse::default()
        };
        let result = ToolCallResult::from_dispatch(&response, "2".to_string());
        assert!(result.success);
        assert_eq!(result.output, json!("2"));
        assert_eq!(result.trace_id.as_deref(), Some("req_deadbeef"));
        assert_eq!(result.elapsed_ms, Some(12.5));
    }

    #[test]
    fn test_from_dispatch_error_becomes_failure() {
        let response = ExecutionResponse {
            error: Some("TIMEOUT: too slow".to_string()),
            trace_id: Some("req_0badf00d".to_string()),
            ..ExecutionResponse::default()
        };
        let result =
            ToolCallResult::from_dispatch(&response, "Error: TIMEOUT: too slow".to_string());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Error: TIMEOUT: too slow"));
        assert!(result.output.is_null());
        assert_eq!(result.trace_id.as_deref(), Some("req_0badf00d"));
    }

    #[test]
    fn test_metadata_builder() {
        let metadata = ToolMetadata::new("execute_script", "Run a script").with_parameter(
            ToolParameter::new("script", ParamKind::String)
                .with_description("Script source")
                .required(),
        );
        assert_eq!(metadata.name, "execute_script");
        assert_eq!(metadata.parameters.len(), 1);
        assert!(metadata.parameters[0].required);
    }

    #[test]
    fn test_parameter_serialization_uses_type_key() {
        let param = ToolParameter::new("timeout", ParamKind::Number);
        let value = serde_json::to_value(&param).unwrap();
        assert_eq!(value["type"], "number");
        assert!(value.get("description").is_none());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ToolCallError::UnknownTool("draw_unicorn".to_string()).to_string(),
            "Unknown tool: draw_unicorn"
        );
        assert!(ToolCallError::Composition("missing library".to_string())
            .to_string()
            .contains("composition"));
    }
}
