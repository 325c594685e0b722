//! Centralized runtime state management.
//!
//! A single [`RuntimeContext`] owns the process-wide bridge and executor
//! instances instead of scattering global singletons. Accessors are
//! lazy-initialized with double-checked locking and are the only supported
//! way for components to obtain the bridge or executor.

use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::aibridge::bridge::WebSocketBridge;
use crate::aibridge::config::BridgeConfig;
use crate::aibridge::executor::ScriptExecutor;

/// Process-wide owner of the bridge and executor singletons.
pub struct RuntimeContext {
    config: BridgeConfig,
    bridge: RwLock<Option<Arc<WebSocketBridge>>>,
    executor: RwLock<Option<Arc<ScriptExecutor>>>,
}

impl RuntimeContext {
    /// Build a context over an explicit configuration.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            bridge: RwLock::new(None),
            executor: RwLock::new(None),
        }
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Get or create the [`WebSocketBridge`] singleton.
    ///
    /// The bridge is started on first access; a startup failure is logged
    /// and the (not-yet-listening) bridge is still returned so callers get
    /// DISCONNECTED responses rather than panics.
    pub fn bridge(&self) -> Arc<WebSocketBridge> {
        {
            let bridge = self.bridge.read().unwrap_or_else(|e| e.into_inner());
            if let Some(bridge) = bridge.as_ref() {
                return Arc::clone(bridge);
            }
        }

        let mut slot = self.bridge.write().unwrap_or_else(|e| e.into_inner());
        // Double check: another thread may have won the race.
        if let Some(bridge) = slot.as_ref() {
            return Arc::clone(bridge);
        }

        let bridge = Arc::new(WebSocketBridge::new(&self.config));
        if let Err(e) = bridge.start() {
            log::error!("WebSocket bridge failed to start: {}", e);
        }
        *slot = Some(Arc::clone(&bridge));
        bridge
    }

    /// Get or create the [`ScriptExecutor`] singleton.
    pub fn executor(&self) -> Arc<ScriptExecutor> {
        {
            let executor = self.executor.read().unwrap_or_else(|e| e.into_inner());
            if let Some(executor) = executor.as_ref() {
                return Arc::clone(executor);
            }
        }

        let bridge = self.bridge();

        let mut slot = self.executor.write().unwrap_or_else(|e| e.into_inner());
        if let Some(executor) = slot.as_ref() {
            return Arc::clone(executor);
        }

        let executor = Arc::new(ScriptExecutor::new(bridge, &self.config));
        *slot = Some(Arc::clone(&executor));
        executor
    }

    /// Tear down the runtime: stop the bridge first, then release both
    /// singletons so a later access would rebuild them.
    pub fn shutdown(&self) {
        let bridge = {
            let mut slot = self.bridge.write().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(bridge) = bridge {
            bridge.stop();
        }
        let mut slot = self.executor.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

/// The global runtime context, configured from the environment.
static RUNTIME: Lazy<RuntimeContext> = Lazy::new(|| {
    let config = BridgeConfig::from_env().unwrap_or_else(|e| {
        log::warn!("{}; falling back to defaults", e);
        BridgeConfig::default()
    });
    RuntimeContext::new(config)
});

/// Get the global runtime context.
pub fn get_runtime() -> &'static RuntimeContext {
    &RUNTIME
}
