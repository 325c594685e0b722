// src/lib.rs

// Import the top-level `aibridge` module.
pub mod aibridge;

// Re-exporting key items for easier external access.
pub use aibridge::bridge::{ConnectionState, WebSocketBridge};
pub use aibridge::config::BridgeConfig;
pub use aibridge::executor::ScriptExecutor;
pub use aibridge::registry::{CommandMetadata, RequestRegistry};
pub use aibridge::response::ExecutionResponse;
pub use aibridge::runtime::get_runtime;

// Flatten the module paths the integration tests and binary lean on.
pub use aibridge::{
    bridge, config, document, errors, event, executor, http_server, libraries, protocol,
    registry, response, runtime, server_builder, targets, task_runtime, tool_protocol, tools,
};
