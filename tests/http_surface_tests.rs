//! Tests for the HTTP tool surface.
//!
//! Starts the real axum adapter on an ephemeral loopback port and talks to
//! it over a raw TCP socket, so no HTTP client dependency is needed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use aibridge::bridge::WebSocketBridge;
use aibridge::config::BridgeConfig;
use aibridge::executor::ScriptExecutor;
use aibridge::http_server::{AxumHttpAdapter, HttpServerAdapter, HttpServerConfig};
use aibridge::libraries::LibraryResolver;
use aibridge::tools::IllustratorToolProtocol;

async fn start_surface() -> (aibridge::http_server::HttpServerInstance, SocketAddr) {
    let config = BridgeConfig::default();
    let bridge = Arc::new(WebSocketBridge::new(&config));
    let protocol = Arc::new(IllustratorToolProtocol::new(
        Arc::new(ScriptExecutor::new(bridge, &config)),
        Arc::new(LibraryResolver::new("does/not/exist")),
    ));

    let server = AxumHttpAdapter
        .start(
            HttpServerConfig {
                addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
                event_handler: None,
            },
            protocol,
        )
        .await
        .expect("surface failed to start");
    let addr = server.addr();
    (server, addr)
}

/// Minimal HTTP/1.1 POST over a raw socket. Returns (status, body).
async fn http_post(addr: SocketAddr, path: &str, body: &Value) -> (u16, Value) {
    let payload = body.to_string();
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        path,
        addr,
        payload.len(),
        payload
    );

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();

    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .expect("malformed status line");
    let body_start = text.find("\r\n\r\n").expect("missing header terminator") + 4;
    let body = parse_http_body(&text[body_start..]);
    (status, body)
}

/// Handle both plain and chunked transfer encodings.
fn parse_http_body(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        return value;
    }
    // Chunked: size lines interleaved with data lines.
    let mut assembled = String::new();
    let mut lines = raw.split("\r\n");
    while let Some(size_line) = lines.next() {
        if usize::from_str_radix(size_line.trim(), 16).unwrap_or(0) == 0 {
            break;
        }
        if let Some(chunk) = lines.next() {
            assembled.push_str(chunk);
        }
    }
    serde_json::from_str(&assembled).expect("unparseable HTTP body")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_tools_endpoint() {
    let (server, addr) = start_surface().await;

    let (status, body) = http_post(addr, "/tools/list", &json!({})).await;
    assert_eq!(status, 200);
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"execute_script"));
    assert!(names.contains(&"run_task"));
    assert!(names.contains(&"connection_status"));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_status_via_http() {
    let (server, addr) = start_surface().await;

    let (status, body) = http_post(
        addr,
        "/tools/execute",
        &json!({ "tool": "connection_status", "params": {} }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["output"]["connected"], false);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_script_disconnected_via_http() {
    let (server, addr) = start_surface().await;

    let (status, body) = http_post(
        addr,
        "/tools/execute",
        &json!({ "tool": "execute_script", "params": { "script": "return 1" } }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("STOP"));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_tool_is_bad_request() {
    let (server, addr) = start_surface().await;

    let (status, body) = http_post(
        addr,
        "/tools/execute",
        &json!({ "tool": "draw_unicorn", "params": {} }),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("Unknown tool"));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_task_payload_is_rejected() {
    let (server, addr) = start_surface().await;

    let (status, body) = http_post(
        addr,
        "/tools/execute",
        &json!({
            "tool": "run_task",
            "params": {
                "payload": {
                    "task": "tag_items",
                    "targets": { "target": { "type": "query" } }
                }
            }
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("V003"));

    server.shutdown().await;
}
