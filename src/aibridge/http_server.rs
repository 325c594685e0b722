//! HTTP adapter for the tool surface.
//!
//! Exposes a [`ToolProtocol`] over two loopback HTTP endpoints:
//!
//! - `POST /tools/list` — list available tools
//! - `POST /tools/execute` — execute a tool: `{"tool": "...", "params": {...}}`
//!
//! The adapter trait keeps the HTTP framework swappable: the builder only
//! talks to [`HttpServerAdapter`], and [`AxumHttpAdapter`] is the default
//! implementation.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::aibridge::event::{BridgeEvent, BridgeEventHandler};
use crate::aibridge::tool_protocol::ToolProtocol;

/// Configuration for an HTTP tool-surface server.
#[derive(Clone)]
pub struct HttpServerConfig {
    /// Socket address to bind to. Loopback only by convention; the builder
    /// never hands out anything else.
    pub addr: SocketAddr,
    /// Optional handler receiving [`BridgeEvent::ToolExecuted`] events.
    pub event_handler: Option<Arc<dyn BridgeEventHandler>>,
}

/// A running HTTP server instance.
pub struct HttpServerInstance {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl HttpServerInstance {
    /// The address the server is actually listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut the server down gracefully and wait for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Trait for HTTP server implementations serving a tool protocol.
#[async_trait]
pub trait HttpServerAdapter: Send + Sync {
    /// Start the server and return a handle to it.
    async fn start(
        &self,
        config: HttpServerConfig,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<HttpServerInstance, Box<dyn Error + Send + Sync>>;

    /// Name of this adapter, for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Shared state handed to the axum handlers.
struct SurfaceState {
    protocol: Arc<dyn ToolProtocol>,
    event_handler: Option<Arc<dyn BridgeEventHandler>>,
}

/// Body of a `POST /tools/execute` request.
#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    tool: String,
    #[serde(default)]
    params: Value,
}

/// Default Axum-based HTTP adapter.
pub struct AxumHttpAdapter;

#[async_trait]
impl HttpServerAdapter for AxumHttpAdapter {
    async fn start(
        &self,
        config: HttpServerConfig,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<HttpServerInstance, Box<dyn Error + Send + Sync>> {
        let state = Arc::new(SurfaceState {
            protocol,
            event_handler: config.event_handler,
        });

        let app = Router::new()
            .route("/tools/list", post(list_tools))
            .route("/tools/execute", post(execute_tool))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(config.addr).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                log::error!("HTTP tool surface error: {}", e);
            }
        });

        log::info!("Tool surface listening on http://{}", addr);
        Ok(HttpServerInstance {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    fn name(&self) -> &str {
        "axum"
    }
}

/// `POST /tools/list`
async fn list_tools(State(state): State<Arc<SurfaceState>>) -> impl IntoResponse {
    match state.protocol.list_tools().await {
        Ok(tools) => (StatusCode::OK, Json(json!({ "tools": tools }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// `POST /tools/execute`
async fn execute_tool(
    State(state): State<Arc<SurfaceState>>,
    Json(request): Json<ExecuteRequest>,
) -> impl IntoResponse {
    let outcome = state
        .protocol
        .execute(&request.tool, request.params)
        .await;

    if let Some(handler) = &state.event_handler {
        handler
            .on_bridge_event(&BridgeEvent::ToolExecuted {
                tool_name: request.tool.clone(),
                success: matches!(&outcome, Ok(result) if result.success),
            })
            .await;
    }

    match outcome {
        Ok(result) => (
            StatusCode::OK,
            Json(serde_json::to_value(&result).unwrap_or(Value::Null)),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}
