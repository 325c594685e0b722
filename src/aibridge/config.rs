//! Configuration for the Illustrator bridge.
//!
//! All settings come from environment variables with validated defaults; no
//! config-file parsing dependencies are introduced. The WebSocket bridge and
//! the HTTP tool surface must listen on different ports, and both bind to
//! the loopback interface only.

use std::env;
use std::fmt;

/// `WS_HOST` — host the WebSocket bridge binds to (default `localhost`).
pub const WS_HOST: &str = "WS_HOST";
/// `WS_PORT` — WebSocket bridge port (default 8081).
pub const WS_PORT: &str = "WS_PORT";
/// `HTTP_PORT` — tool-surface HTTP port (default 8080).
pub const HTTP_PORT: &str = "HTTP_PORT";
/// `TIMEOUT_SECONDS` — default script execution timeout (default 30.0).
pub const TIMEOUT_SECONDS: &str = "TIMEOUT_SECONDS";
/// `LOG_LEVEL` — log filter for `env_logger` (default `INFO`).
pub const LOG_LEVEL: &str = "LOG_LEVEL";
/// `SCRIPT_LIBRARY_DIR` — directory holding the `.jsx` library manifest.
pub const SCRIPT_LIBRARY_DIR: &str = "SCRIPT_LIBRARY_DIR";

const PORT_MIN: u16 = 1024;
const TIMEOUT_MIN: f64 = 1.0;
const TIMEOUT_MAX: f64 = 300.0;

/// A configuration value failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Host the WebSocket listener binds to.
    pub ws_host: String,
    /// WebSocket bridge port the extension connects to.
    pub ws_port: u16,
    /// HTTP port the tool surface listens on. Must differ from `ws_port`.
    pub http_port: u16,
    /// Default timeout for script execution, in seconds.
    pub timeout_seconds: f64,
    /// Log filter handed to `env_logger` at startup.
    pub log_level: String,
    /// Directory the library resolver reads manifests and `.jsx` files from.
    pub script_library_dir: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ws_host: "localhost".to_string(),
            ws_port: 8081,
            http_port: 8080,
            timeout_seconds: 30.0,
            log_level: "INFO".to_string(),
            script_library_dir: "resources/scripts".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// unset variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is present but unparseable,
    /// a port or timeout is out of range, or `WS_PORT` equals `HTTP_PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            ws_host: env_string(WS_HOST).unwrap_or(defaults.ws_host),
            ws_port: env_parse(WS_PORT)?.unwrap_or(defaults.ws_port),
            http_port: env_parse(HTTP_PORT)?.unwrap_or(defaults.http_port),
            timeout_seconds: env_parse(TIMEOUT_SECONDS)?.unwrap_or(defaults.timeout_seconds),
            log_level: env_string(LOG_LEVEL).unwrap_or(defaults.log_level),
            script_library_dir: env_string(SCRIPT_LIBRARY_DIR)
                .unwrap_or(defaults.script_library_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every range constraint and the port-collision rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ws_port < PORT_MIN {
            return Err(ConfigError(format!(
                "{} must be in [{}, 65535], got {}",
                WS_PORT, PORT_MIN, self.ws_port
            )));
        }
        if self.http_port < PORT_MIN {
            return Err(ConfigError(format!(
                "{} must be in [{}, 65535], got {}",
                HTTP_PORT, PORT_MIN, self.http_port
            )));
        }
        if self.ws_port == self.http_port {
            return Err(ConfigError(format!(
                "{} must differ from {} (both are {})",
                WS_PORT, HTTP_PORT, self.ws_port
            )));
        }
        if !(self.timeout_seconds >= TIMEOUT_MIN && self.timeout_seconds <= TIMEOUT_MAX) {
            return Err(ConfigError(format!(
                "{} must be in [{}, {}], got {}",
                TIMEOUT_SECONDS, TIMEOUT_MIN, TIMEOUT_MAX, self.timeout_seconds
            )));
        }
        Ok(())
    }

    /// The `ws://` URL the extension panel should connect to.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.ws_host, self.ws_port)
    }
}

/// Reads an environment variable as a string, `None` if unset or empty.
fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

/// Reads and parses an environment variable, `Ok(None)` if unset.
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError(format!("{} has invalid value {:?}", name, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.ws_host, "localhost");
        assert_eq!(config.ws_port, 8081);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.timeout_seconds, 30.0);
        assert_eq!(config.log_level, "INFO");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ports_must_differ() {
        let config = BridgeConfig {
            ws_port: 9000,
            http_port: 9000,
            ..BridgeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.0.contains("must differ"));
    }

    #[test]
    fn test_port_range() {
        let config = BridgeConfig {
            ws_port: 80,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_range() {
        let low = BridgeConfig {
            timeout_seconds: 0.5,
            ..BridgeConfig::default()
        };
        assert!(low.validate().is_err());

        let high = BridgeConfig {
            timeout_seconds: 301.0,
            ..BridgeConfig::default()
        };
        assert!(high.validate().is_err());
    }

    #[test]
    fn test_ws_url() {
        let config = BridgeConfig::default();
        assert_eq!(config.ws_url(), "ws://localhost:8081");
    }
}
