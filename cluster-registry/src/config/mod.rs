// Configuration Module
//
// Configuration for a registry instance: naming, timeouts and logging.
//
// ```rust
// use cluster_registry::config::{LogLevel, LoggingConfig, RegistryConfig};
//
// let config = RegistryConfig::new("node-a")
//     .with_default_timeout(2_000)
//     .with_logging_config(LoggingConfig::new().with_default_level(LogLevel::Debug));
// ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

// Re-export configuration types from cluster_common::logging
pub use cluster_common::logging::{LogLevel, LoggingConfig};

/// Default invocation timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default name of the registrar on every node
pub const DEFAULT_REGISTRAR_NAME: &str = "registry";

/// Registry Configuration
///
/// INTENTION: Provide configuration options for a Registry instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Name used in log lines
    pub node_name: String,

    /// Name of the registrar, part of every `NodeRef` this node hands out
    #[serde(default = "default_registrar_name")]
    pub registrar_name: String,

    /// Invocation timeout used when a call does not specify one
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Timeout of round trips to the registrar (registration, lookups).
    /// Falls back to `default_timeout_ms`.
    #[serde(default)]
    pub ask_timeout_ms: Option<u64>,

    /// Logging configuration, applied when the registry is created
    #[serde(default)]
    pub logging_config: Option<LoggingConfig>,
}

fn default_registrar_name() -> String {
    DEFAULT_REGISTRAR_NAME.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl RegistryConfig {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            registrar_name: default_registrar_name(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            ask_timeout_ms: None,
            logging_config: None,
        }
    }

    pub fn with_registrar_name(mut self, name: impl Into<String>) -> Self {
        self.registrar_name = name.into();
        self
    }

    /// Set the default invocation timeout in milliseconds
    pub fn with_default_timeout(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Set the registrar round-trip timeout in milliseconds
    pub fn with_ask_timeout(mut self, timeout_ms: u64) -> Self {
        self.ask_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_logging_config(mut self, config: LoggingConfig) -> Self {
        self.logging_config = Some(config);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms.unwrap_or(self.default_timeout_ms))
    }
}

impl std::fmt::Display for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RegistryConfig: node:{} registrar:{} default_timeout:{}ms ask_timeout:{}ms",
            self.node_name,
            self.registrar_name,
            self.default_timeout_ms,
            self.ask_timeout().as_millis()
        )
    }
}
