//! Integrated WebSocket bridge for the Adobe Illustrator extension panel.
//!
//! Runs a WebSocket server that the extension connects to directly, so no
//! separate proxy process is needed. The listener lives on its own thread
//! with a current-thread tokio runtime — the I/O domain — while callers
//! submit dispatches from their own async context and await the reply there.
//! The only state shared between the two domains is the
//! [`RequestRegistry`](crate::aibridge::registry::RequestRegistry) (lock-protected) and
//! a few atomic fields.
//!
//! At most one peer is live at a time. A new handshake displaces the previous
//! peer ("last connection wins"): the new connection becomes the reference
//! first, then the old one is closed with code 1000/"Replaced". Peer loss
//! fails every pending dispatch with a connection-loss error.

use std::sync::atomic::{AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::aibridge::config::BridgeConfig;
use crate::aibridge::errors::{BridgeErrorCode, DispatchError, DISCONNECT_HINT};
use crate::aibridge::event::{BridgeEvent, BridgeEventHandler};
use crate::aibridge::registry::{CommandMetadata, RequestRegistry};
use crate::aibridge::response::ExecutionResponse;

/// Interval between heartbeat pings to the peer.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long a ping may go unanswered before the peer is considered lost.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `start()` waits for the listener to become ready.
const START_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `stop()` waits for the I/O thread to exit.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state of the single extension peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Error,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Commands handed to the connection task that owns the socket's write half.
///
/// All writes are funneled through this channel, so frames can never
/// interleave: the connection task is the single writer.
enum PeerCommand {
    /// Write a text frame. `request_id` is set for dispatches so a write
    /// failure can fail the correlated request.
    Frame {
        request_id: Option<u64>,
        text: String,
    },
    /// Send a close frame and terminate the connection task.
    Close { code: CloseCode, reason: String },
}

/// Handle to the live peer, held behind a mutex.
struct PeerHandle {
    serial: u64,
    addr: String,
    tx: mpsc::UnboundedSender<PeerCommand>,
}

/// State shared between the I/O domain and caller domains.
struct Shared {
    registry: Arc<RequestRegistry>,
    peer: Mutex<Option<PeerHandle>>,
    state: AtomicU8,
    peer_serial: AtomicU64,
    bound_port: AtomicU16,
    shutdown: Notify,
    events: Mutex<Option<Arc<dyn BridgeEventHandler>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    async fn emit(&self, event: BridgeEvent) {
        let handler = {
            let guard = self.events.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        if let Some(handler) = handler {
            handler.on_bridge_event(&event).await;
        }
    }
}

/// The WebSocket dispatch bridge.
///
/// `start()` launches the listener on a dedicated thread and waits (bounded)
/// for readiness. [`send`](WebSocketBridge::send) is the only way to submit
/// work: it correlates the dispatch by request ID and awaits the peer's reply
/// under the caller's timeout.
pub struct WebSocketBridge {
    host: String,
    port: u16,
    shared: Arc<Shared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WebSocketBridge {
    /// Create a bridge for the configured host/port. Does not listen yet.
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            host: config.ws_host.clone(),
            port: config.ws_port,
            shared: Arc::new(Shared {
                registry: Arc::new(RequestRegistry::new()),
                peer: Mutex::new(None),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                peer_serial: AtomicU64::new(0),
                bound_port: AtomicU16::new(0),
                shutdown: Notify::new(),
                events: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Attach an event handler for bridge lifecycle and dispatch events.
    pub fn with_event_handler(self, handler: Arc<dyn BridgeEventHandler>) -> Self {
        {
            let mut guard = self.shared.events.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(handler);
        }
        self
    }

    /// The registry tracking this bridge's pending dispatches.
    pub fn registry(&self) -> Arc<RequestRegistry> {
        Arc::clone(&self.shared.registry)
    }

    /// Current peer connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether an extension peer is currently connected.
    pub fn is_connected(&self) -> bool {
        if self.shared.state() != ConnectionState::Connected {
            return false;
        }
        let peer = self.shared.peer.lock().unwrap_or_else(|e| e.into_inner());
        peer.is_some()
    }

    /// Port the listener binds to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Port the listener is actually bound on, once ready. Differs from
    /// [`port`](WebSocketBridge::port) when configured with port 0.
    pub fn local_port(&self) -> u16 {
        self.shared.bound_port.load(Ordering::SeqCst)
    }

    /// Start the WebSocket server on its own thread.
    ///
    /// Blocks up to ten seconds for the listener to signal readiness. A bind
    /// failure (notably "address in use") is returned as an error; a slow
    /// startup is logged but not fatal.
    ///
    /// # Errors
    ///
    /// Returns an error when the I/O runtime cannot be built or the listener
    /// fails to bind.
    pub fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        {
            let thread = self.thread.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = thread.as_ref() {
                if !handle.is_finished() {
                    log::warn!("WebSocket bridge already running");
                    return Ok(());
                }
            }
        }

        log::info!("Starting WebSocket bridge thread...");
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);
        let shared = Arc::clone(&self.shared);
        let host = self.host.clone();
        let port = self.port;

        let handle = thread::Builder::new()
            .name("ws-bridge".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("failed to build I/O runtime: {}", e)));
                        return;
                    }
                };
                runtime.block_on(run_server(shared, host, port, ready_tx));
            })?;

        {
            let mut thread = self.thread.lock().unwrap_or_else(|e| e.into_inner());
            *thread = Some(handle);
        }

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                log::info!("WebSocket bridge thread started successfully");
                Ok(())
            }
            Ok(Err(message)) => {
                self.shared.set_state(ConnectionState::Error);
                log::error!("{}", message);
                Err(message.into())
            }
            Err(_) => {
                // Reported but not fatal: the extension simply cannot connect
                // until the listener comes up.
                log::error!(
                    "WebSocket bridge FAILED to become ready within {:?}",
                    START_TIMEOUT
                );
                Ok(())
            }
        }
    }

    /// Stop the WebSocket server.
    ///
    /// Signals shutdown to the listener, which closes the peer with code
    /// 1000/"Server shutting down", joins the I/O thread (bounded), then
    /// fails any still-pending requests.
    pub fn stop(&self) {
        self.shared.shutdown.notify_one();

        let handle = {
            let mut thread = self.thread.lock().unwrap_or_else(|e| e.into_inner());
            thread.take()
        };
        if let Some(handle) = handle {
            let deadline = std::time::Instant::now() + STOP_JOIN_TIMEOUT;
            while !handle.is_finished() && std::time::Instant::now() < deadline {
                thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!("WebSocket bridge thread did not exit within {:?}", STOP_JOIN_TIMEOUT);
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        let swept = self.shared.registry.cancel_all("Bridge shutting down");
        if swept > 0 {
            log::info!("Cancelled {} pending requests on shutdown", swept);
        }
    }

    /// Dispatch a script to the connected extension and await its reply.
    ///
    /// Returns a DISCONNECTED response immediately — without allocating a
    /// request ID — when no peer is attached. On timeout the pending entry is
    /// failed *first*, so a late reply finds nothing and is dropped silently.
    pub async fn send(
        &self,
        script: &str,
        timeout: Duration,
        command: Option<CommandMetadata>,
        trace_id: Option<String>,
    ) -> ExecutionResponse {
        if !self.is_connected() {
            return ExecutionResponse::from_code(BridgeErrorCode::Disconnected, DISCONNECT_HINT);
        }

        let context = command
            .as_ref()
            .map(|c| format!(" [{}]", c.command_type))
            .unwrap_or_default();
        if let Some(c) = &command {
            log::info!("[{}] Executing via {}", c.command_type, c.tool_name);
        }

        let (request_id, reply) =
            self.shared
                .registry
                .create(script, command.clone(), trace_id.clone());

        let mut message = json!({ "id": request_id, "script": script });
        if let Some(c) = &command {
            message["command"] = serde_json::to_value(c).unwrap_or(serde_json::Value::Null);
        }
        if let Some(t) = &trace_id {
            message["trace_id"] = json!(t);
        }

        let sender = {
            let peer = self.shared.peer.lock().unwrap_or_else(|e| e.into_inner());
            peer.as_ref().map(|p| p.tx.clone())
        };
        let delivered = match sender {
            Some(tx) => tx
                .send(PeerCommand::Frame {
                    request_id: Some(request_id),
                    text: message.to_string(),
                })
                .is_ok(),
            None => false,
        };
        if !delivered {
            self.shared.registry.fail(
                request_id,
                DispatchError::new(BridgeErrorCode::Disconnected, DISCONNECT_HINT),
            );
            return ExecutionResponse::from_code(BridgeErrorCode::Disconnected, DISCONNECT_HINT);
        }

        log::debug!("Sent request {} to Illustrator", request_id);
        self.shared
            .emit(BridgeEvent::DispatchSent {
                request_id,
                trace_id: trace_id.clone(),
            })
            .await;

        let started = std::time::Instant::now();
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(reply))) => {
                self.shared
                    .emit(BridgeEvent::DispatchCompleted {
                        request_id,
                        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
                    })
                    .await;
                ExecutionResponse::from_reply(reply)
            }
            Ok(Ok(Err(error))) => ExecutionResponse::from_dispatch_error(&error),
            Ok(Err(_)) => ExecutionResponse::from_code(
                BridgeErrorCode::ProxyError,
                "reply channel dropped before completion",
            ),
            Err(_) => {
                // Fail the entry before responding so the late reply is a no-op.
                let timeout_secs = timeout.as_secs_f64();
                self.shared.registry.fail(
                    request_id,
                    DispatchError::new(
                        BridgeErrorCode::Timeout,
                        format!("Script execution timed out after {}s", timeout_secs),
                    ),
                );
                self.shared
                    .emit(BridgeEvent::DispatchTimedOut {
                        request_id,
                        timeout_secs,
                    })
                    .await;
                ExecutionResponse {
                    error: Some(format!(
                        "TIMEOUT{}: Script execution timed out after {}s",
                        context, timeout_secs
                    )),
                    ..ExecutionResponse::default()
                }
            }
        }
    }
}

impl Drop for WebSocketBridge {
    fn drop(&mut self) {
        self.shared.shutdown.notify_one();
    }
}

/// Accept loop: owns the listener, hands each handshake to a connection task.
async fn run_server(
    shared: Arc<Shared>,
    host: String,
    port: u16,
    ready_tx: std_mpsc::SyncSender<Result<(), String>>,
) {
    let listener = match TcpListener::bind((host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(e) => {
            let message = if e.kind() == std::io::ErrorKind::AddrInUse {
                format!(
                    "Port {} is already in use! Another process may be using it.",
                    port
                )
            } else {
                format!("WebSocket server failed to bind {}:{}: {}", host, port, e)
            };
            let _ = ready_tx.send(Err(message));
            return;
        }
    };

    let bound_port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
    shared.bound_port.store(bound_port, Ordering::SeqCst);
    log::info!("WebSocket bridge STARTED on port {}", bound_port);
    log::info!("Extension panel should connect to: ws://{}:{}", host, bound_port);
    let _ = ready_tx.send(Ok(()));
    shared
        .emit(BridgeEvent::ServerStarted {
            host: host.clone(),
            port: bound_port,
        })
        .await;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let shared = Arc::clone(&shared);
                        tokio::spawn(async move {
                            handle_connection(shared, stream, addr.to_string()).await;
                        });
                    }
                    Err(e) => {
                        log::warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = shared.shutdown.notified() => {
                break;
            }
        }
    }

    // Ask the live peer's task to close cleanly before the runtime goes away.
    let peer_tx = {
        let peer = shared.peer.lock().unwrap_or_else(|e| e.into_inner());
        peer.as_ref().map(|p| p.tx.clone())
    };
    if let Some(tx) = peer_tx {
        let _ = tx.send(PeerCommand::Close {
            code: CloseCode::Normal,
            reason: "Server shutting down".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    shared.emit(BridgeEvent::ServerStopped).await;
    log::info!("WebSocket bridge stopped");
}

/// Drive one peer connection: admission, reads, serialized writes, heartbeat.
async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, addr: String) {
    let has_peer = {
        let peer = shared.peer.lock().unwrap_or_else(|e| e.into_inner());
        peer.is_some()
    };
    if !has_peer {
        shared.set_state(ConnectionState::Connecting);
    }
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("WebSocket handshake failed for {}: {}", addr, e);
            let still_connected = {
                let peer = shared.peer.lock().unwrap_or_else(|e| e.into_inner());
                peer.is_some()
            };
            shared.set_state(if still_connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            });
            return;
        }
    };

    let serial = shared.peer_serial.fetch_add(1, Ordering::SeqCst) + 1;
    let (tx, mut rx) = mpsc::unbounded_channel::<PeerCommand>();

    // Last connection wins: the new peer becomes the reference before the old
    // one is closed, and the old peer's in-flight dispatches are swept.
    let displaced = {
        let mut peer = shared.peer.lock().unwrap_or_else(|e| e.into_inner());
        peer.replace(PeerHandle {
            serial,
            addr: addr.clone(),
            tx,
        })
    };
    if let Some(old) = displaced {
        log::info!("New connection received. Closing existing connection.");
        let swept = shared.registry.cancel_all("Replaced by new connection");
        if swept > 0 {
            shared
                .emit(BridgeEvent::RequestsCancelled {
                    count: swept,
                    reason: "Replaced by new connection".to_string(),
                })
                .await;
        }
        let _ = old.tx.send(PeerCommand::Close {
            code: CloseCode::Normal,
            reason: "Replaced".to_string(),
        });
        shared
            .emit(BridgeEvent::PeerReplaced {
                old_addr: old.addr,
                new_addr: addr.clone(),
            })
            .await;
    }

    shared.set_state(ConnectionState::Connected);
    log::info!("Illustrator extension connected ({})", addr);
    shared
        .emit(BridgeEvent::PeerConnected { addr: addr.clone() })
        .await;

    let (mut sink, mut inbound) = ws.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // the first tick fires immediately
    let mut pong_deadline: Option<tokio::time::Instant> = None;
    let reason;

    loop {
        // `async move` copies the deadline out so the select arms below can
        // reassign `pong_deadline` freely.
        let pong_check = async move {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures_util::future::pending().await,
            }
        };

        tokio::select! {
            command = rx.recv() => match command {
                Some(PeerCommand::Frame { request_id, text }) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        log::error!("Write to extension failed: {}", e);
                        if let Some(id) = request_id {
                            shared.registry.fail(
                                id,
                                DispatchError::new(
                                    BridgeErrorCode::ExecutionError,
                                    format!("write failed: {}", e),
                                ),
                            );
                        }
                        reason = format!("write error: {}", e);
                        break;
                    }
                }
                Some(PeerCommand::Close { code, reason: why }) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: why.clone().into(),
                        })))
                        .await;
                    reason = why;
                    break;
                }
                None => {
                    reason = "bridge dropped".to_string();
                    break;
                }
            },
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&shared.registry, &text);
                }
                Some(Ok(Message::Pong(_))) => {
                    pong_deadline = None;
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    reason = "extension closed the connection".to_string();
                    break;
                }
                Some(Ok(_)) => {
                    log::warn!("Ignoring non-text frame from extension");
                }
                Some(Err(e)) => {
                    reason = format!("read error: {}", e);
                    break;
                }
                None => {
                    reason = "connection closed".to_string();
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if pong_deadline.is_none() {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        reason = "ping failed".to_string();
                        break;
                    }
                    pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                }
            }
            _ = pong_check => {
                reason = "heartbeat timeout".to_string();
                break;
            }
        }
    }

    // Only the task that still owns the peer slot performs the disconnect
    // bookkeeping; a displaced task must not sweep the new peer's requests.
    let was_current = {
        let mut peer = shared.peer.lock().unwrap_or_else(|e| e.into_inner());
        match peer.as_ref() {
            Some(current) if current.serial == serial => {
                *peer = None;
                true
            }
            _ => false,
        }
    };
    if was_current {
        shared.set_state(ConnectionState::Disconnected);
        log::info!("Illustrator extension disconnected ({})", reason);
        let swept = shared.registry.cancel_all("Illustrator disconnected");
        shared
            .emit(BridgeEvent::PeerDisconnected {
                reason: reason.clone(),
            })
            .await;
        if swept > 0 {
            shared
                .emit(BridgeEvent::RequestsCancelled {
                    count: swept,
                    reason,
                })
                .await;
        }
    }
}

/// Route one inbound text frame to the registry.
///
/// Frames must be UTF-8 JSON objects with a numeric `id`. Invalid JSON and
/// id-less frames are logged and dropped; they never terminate the
/// connection.
fn handle_frame(registry: &RequestRegistry, text: &str) {
    let data: serde_json::Value = match serde_json::from_str(text) {
        Ok(data) => data,
        Err(e) => {
            log::error!("Invalid JSON from extension panel: {}", e);
            return;
        }
    };
    let request_id = match data.get("id").and_then(|id| id.as_u64()) {
        Some(id) => id,
        None => {
            log::warn!("Received frame without a request id; ignoring");
            return;
        }
    };
    if registry.complete(request_id, data) {
        log::debug!("Request {} completed", request_id);
    } else {
        log::warn!("Received response for unknown request: {}", request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initially_disconnected() {
        let bridge = WebSocketBridge::new(&BridgeConfig::default());
        assert!(!bridge.is_connected());
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_without_peer_burns_no_id() {
        let bridge = WebSocketBridge::new(&BridgeConfig::default());
        let response = bridge
            .send("return 1", Duration::from_secs(1), None, None)
            .await;
        assert!(response.is_error());
        let error = response.error.unwrap();
        assert!(error.starts_with("DISCONNECTED"));

        // No request ID was allocated for the refused dispatch.
        let (next_id, _rx) = bridge.registry().create("probe", None, None);
        assert_eq!(next_id, 1);
    }

    #[test]
    fn test_handle_frame_invalid_json_is_dropped() {
        let registry = RequestRegistry::new();
        handle_frame(&registry, "not json");
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_frame_unknown_id_does_not_disturb_pending() {
        let registry = RequestRegistry::new();
        let (id, rx) = registry.create("s", None, None);
        handle_frame(&registry, r#"{"id": 999, "result": "orphan"}"#);
        assert!(registry.contains(id));
        handle_frame(&registry, &format!(r#"{{"id": {}, "result": 2}}"#, id));
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply["result"], 2);
    }
}
