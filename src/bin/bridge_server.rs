//! Illustrator bridge server.
//!
//! Starts the WebSocket dispatch bridge (the Illustrator extension connects
//! to it) and the loopback HTTP tool surface (the controlling agent calls
//! it), then runs until interrupted. Shutdown order matters: the tool
//! surface stops taking calls first, then the bridge closes its peer and
//! drains pending requests.

use aibridge::server_builder::BridgeServerBuilder;
use aibridge::runtime::get_runtime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let runtime = get_runtime();
    let config = runtime.config().clone();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.to_lowercase()),
    )
    .init();

    log::info!("==================================================");
    log::info!("Illustrator bridge starting");
    log::info!("  WebSocket bridge: {}", config.ws_url());
    log::info!("  Tool surface:     http://127.0.0.1:{}", config.http_port);
    log::info!("==================================================");

    // Bring the bridge up first so the panel can connect while the tool
    // surface is still binding.
    let _bridge = runtime.bridge();

    let server = BridgeServerBuilder::new()
        .with_illustrator_tools(runtime)
        .start_on(config.http_port)
        .await?;
    log::info!("Tool surface ready at http://{}", server.addr());

    tokio::signal::ctrl_c().await?;
    log::info!("Interrupt received, shutting down");

    server.shutdown().await;
    runtime.shutdown();
    log::info!("Shutdown complete");
    Ok(())
}
