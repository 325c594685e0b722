//! Illustrator tool surface.
//!
//! [`IllustratorToolProtocol`] is the [`ToolProtocol`] implementation the
//! agent-facing surface serves. Every tool bottoms out in the script
//! executor: `execute_script` dispatches raw source (with optional library
//! injection), `run_task` wraps a declarative task payload in the
//! task-runtime library before dispatching, and the remaining tools expose
//! bridge diagnostics without touching the host.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::aibridge::executor::ScriptExecutor;
use crate::aibridge::libraries::LibraryResolver;
use crate::aibridge::protocol::TaskPayload;
use crate::aibridge::registry::CommandMetadata;
use crate::aibridge::response::format_response;
use crate::aibridge::task_runtime::validate_payload;
use crate::aibridge::tool_protocol::{
    ParamKind, ToolCallError, ToolCallResult, ToolMetadata, ToolParameter, ToolProtocol,
};

/// Library providing `executeTask` inside the script host.
const TASK_RUNTIME_LIBRARY: &str = "task_executor";

/// Tool surface backed by the script executor and library resolver.
pub struct IllustratorToolProtocol {
    executor: Arc<ScriptExecutor>,
    resolver: Arc<LibraryResolver>,
}

impl IllustratorToolProtocol {
    pub fn new(executor: Arc<ScriptExecutor>, resolver: Arc<LibraryResolver>) -> Self {
        Self { executor, resolver }
    }

    /// Execute raw script source, prepending any requested libraries.
    async fn execute_script(&self, arguments: &Value) -> Result<ToolCallResult, ToolCallError> {
        let script = arguments
            .get("script")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                ToolCallError::InvalidArguments("script must be a non-empty string".to_string())
            })?;
        let includes = string_list(arguments.get("includes"))?;
        let timeout = timeout_arg(arguments)?;

        let combined = self
            .resolver
            .inject_libraries(script, &includes)
            .map_err(|e| ToolCallError::Composition(e.to_string()))?;

        let command = CommandMetadata::new("execute_script", "illustrator_execute_script")
            .with_param("script_length", json!(combined.len()));
        let response = self
            .executor
            .execute(&combined, timeout, Some(command), None)
            .await;

        let formatted = format_response(&response);
        Ok(ToolCallResult::from_dispatch(&response, formatted))
    }

    /// Validate a task payload and dispatch it through the task runtime
    /// library in the script host.
    async fn run_task(&self, arguments: &Value) -> Result<ToolCallResult, ToolCallError> {
        let payload_value = arguments
            .get("payload")
            .ok_or_else(|| ToolCallError::InvalidArguments("payload is required".to_string()))?;
        let payload: TaskPayload = serde_json::from_value(payload_value.clone())
            .map_err(|e| ToolCallError::InvalidArguments(format!("invalid task payload: {}", e)))?;

        // Fail fast on V* errors before anything reaches the host.
        if let Err(error) = validate_payload(&payload) {
            return Err(ToolCallError::InvalidArguments(format!(
                "{}: {}",
                error.code, error.message
            )));
        }

        let mut includes = vec![TASK_RUNTIME_LIBRARY.to_string()];
        includes.extend(string_list(arguments.get("includes"))?);

        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| ToolCallError::Composition(e.to_string()))?;
        let script = format!("executeTask({});", payload_json);
        let combined = self
            .resolver
            .inject_libraries(&script, &includes)
            .map_err(|e| ToolCallError::Composition(e.to_string()))?;

        let timeout = payload
            .options
            .as_ref()
            .and_then(|o| o.timeout)
            .map(Duration::from_secs_f64);
        let command = CommandMetadata::new(payload.task.clone(), "illustrator_run_task")
            .with_param("task", json!(payload.task));
        let response = self
            .executor
            .execute(&combined, timeout, Some(command), None)
            .await;

        let formatted = format_response(&response);
        Ok(ToolCallResult::from_dispatch(&response, formatted))
    }

    /// Report bridge connectivity and dispatch bookkeeping.
    fn connection_status(&self) -> ToolCallResult {
        let bridge = self.executor.bridge();
        ToolCallResult::success(json!({
            "connected": bridge.is_connected(),
            "state": format!("{:?}", bridge.state()),
            "pendingRequests": bridge.registry().pending_count(),
            "wsPort": bridge.port(),
        }))
    }

    /// List the libraries the resolver knows about.
    fn list_libraries(&self) -> ToolCallResult {
        let manifest = self.resolver.manifest();
        let mut libraries: Vec<Value> = manifest
            .libraries
            .iter()
            .map(|(name, entry)| {
                json!({
                    "name": name,
                    "file": entry.file,
                    "version": entry.version,
                    "dependencies": entry.dependencies,
                    "exports": entry.exports,
                })
            })
            .collect();
        libraries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        ToolCallResult::success(json!({
            "manifestVersion": manifest.version,
            "libraries": libraries,
        }))
    }
}

#[async_trait]
impl ToolProtocol for IllustratorToolProtocol {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, Box<dyn Error + Send + Sync>> {
        match tool_name {
            "execute_script" => Ok(self.execute_script(&arguments).await?),
            "run_task" => Ok(self.run_task(&arguments).await?),
            "connection_status" => Ok(self.connection_status()),
            "list_libraries" => Ok(self.list_libraries()),
            other => Err(Box::new(ToolCallError::UnknownTool(other.to_string()))),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(vec![
            ToolMetadata::new(
                "execute_script",
                "Execute raw JavaScript/ExtendScript code in Adobe Illustrator",
            )
            .with_parameter(
                ToolParameter::new("script", ParamKind::String)
                    .with_description("JavaScript/ExtendScript code to execute")
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("includes", ParamKind::Array)
                    .with_description("Script library names to prepend"),
            )
            .with_parameter(
                ToolParameter::new("timeout", ParamKind::Number)
                    .with_description("Execution timeout in seconds"),
            ),
            ToolMetadata::new(
                "run_task",
                "Run a declarative task (validate → collect → compute → apply) in Illustrator",
            )
            .with_parameter(
                ToolParameter::new("payload", ParamKind::Object)
                    .with_description("Task payload: task, targets, params, options")
                    .required(),
            )
            .with_parameter(
                ToolParameter::new("includes", ParamKind::Array)
                    .with_description("Extra script libraries beyond the task runtime"),
            ),
            ToolMetadata::new(
                "connection_status",
                "Report whether the Illustrator extension is connected",
            ),
            ToolMetadata::new("list_libraries", "List available script libraries"),
        ])
    }

    async fn get_tool_metadata(
        &self,
        tool_name: &str,
    ) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>> {
        self.list_tools()
            .await?
            .into_iter()
            .find(|metadata| metadata.name == tool_name)
            .ok_or_else(|| {
                Box::new(ToolCallError::UnknownTool(tool_name.to_string()))
                    as Box<dyn Error + Send + Sync>
            })
    }

    fn protocol_name(&self) -> &str {
        "illustrator"
    }
}

/// Parse an optional array-of-strings argument.
fn string_list(value: Option<&Value>) -> Result<Vec<String>, ToolCallError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    ToolCallError::InvalidArguments("includes must be strings".to_string())
                })
            })
            .collect(),
        Some(_) => Err(ToolCallError::InvalidArguments(
            "includes must be an array of strings".to_string(),
        )),
    }
}

/// Parse an optional `timeout` argument (seconds).
fn timeout_arg(arguments: &Value) -> Result<Option<Duration>, ToolCallError> {
    match arguments.get("timeout") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let seconds = value.as_f64().ok_or_else(|| {
                ToolCallError::InvalidArguments("timeout must be a number".to_string())
            })?;
            if !(seconds > 0.0) {
                return Err(ToolCallError::InvalidArguments(
                    "timeout must be positive".to_string(),
                ));
            }
            Ok(Some(Duration::from_secs_f64(seconds)))
        }
    }
}
