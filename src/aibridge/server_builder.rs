//! Bridge server builder.
//!
//! Wires the tool surface together: which protocol to serve, which HTTP
//! adapter to serve it with, and which event handler observes it.
//!
//! # Example
//!
//! ```rust,ignore
//! use aibridge::server_builder::BridgeServerBuilder;
//! use aibridge::runtime::get_runtime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let runtime = get_runtime();
//!     let server = BridgeServerBuilder::new()
//!         .with_illustrator_tools(runtime)
//!         .start_on(runtime.config().http_port)
//!         .await?;
//!     println!("Tool surface at {}", server.addr());
//!     Ok(())
//! }
//! ```

use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::aibridge::event::BridgeEventHandler;
use crate::aibridge::http_server::{
    AxumHttpAdapter, HttpServerAdapter, HttpServerConfig, HttpServerInstance,
};
use crate::aibridge::libraries::LibraryResolver;
use crate::aibridge::runtime::RuntimeContext;
use crate::aibridge::tool_protocol::ToolProtocol;
use crate::aibridge::tools::IllustratorToolProtocol;

/// Builder for the agent-facing tool-surface server.
pub struct BridgeServerBuilder {
    protocol: Option<Arc<dyn ToolProtocol>>,
    adapter: Arc<dyn HttpServerAdapter>,
    event_handler: Option<Arc<dyn BridgeEventHandler>>,
}

impl BridgeServerBuilder {
    /// Create a builder with the default Axum adapter and no tools.
    pub fn new() -> Self {
        Self {
            protocol: None,
            adapter: Arc::new(AxumHttpAdapter),
            event_handler: None,
        }
    }

    /// Serve the Illustrator tool set backed by the runtime's executor and
    /// the configured script library directory.
    pub fn with_illustrator_tools(mut self, runtime: &RuntimeContext) -> Self {
        let resolver = Arc::new(LibraryResolver::new(
            runtime.config().script_library_dir.clone(),
        ));
        self.protocol = Some(Arc::new(IllustratorToolProtocol::new(
            runtime.executor(),
            resolver,
        )));
        self
    }

    /// Serve a custom tool protocol.
    pub fn with_protocol(mut self, protocol: Arc<dyn ToolProtocol>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Swap the HTTP framework adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn HttpServerAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Attach an event handler for tool execution events.
    pub fn with_event_handler(mut self, handler: Arc<dyn BridgeEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Start the server on `127.0.0.1:<port>`.
    ///
    /// The surface only ever binds the loopback interface.
    pub async fn start_on(
        self,
        port: u16,
    ) -> Result<HttpServerInstance, Box<dyn Error + Send + Sync>> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        self.start_at(addr).await
    }

    /// Start the server at an explicit address.
    pub async fn start_at(
        self,
        addr: SocketAddr,
    ) -> Result<HttpServerInstance, Box<dyn Error + Send + Sync>> {
        let protocol = self
            .protocol
            .ok_or("no tool protocol configured; call with_illustrator_tools()")?;
        let config = HttpServerConfig {
            addr,
            event_handler: self.event_handler,
        };
        log::info!("Starting tool surface via {} adapter", self.adapter.name());
        self.adapter.start(config, protocol).await
    }
}

impl Default for BridgeServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
