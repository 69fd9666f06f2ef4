// Logging utilities for the cluster registry
//
// This module provides the component-based structured logging used by every crate:
// - Component-based prefixes (`Registrar`, `Registry.Listener`, ...)
// - Node ID tracking through logger inheritance
// - Route path tracing for invocations
// - Per-component level filters backed by env_logger

use log::{log, log_enabled, Level, LevelFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Arguments, Display, Formatter};

/// Prefix of every log target emitted by [`Logger`]
pub const TARGET_PREFIX: &str = "cluster";

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Node,
    Registry,
    Registrar,
    Invoker,
    Transport,
    Listener,
    Proxy,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Node => "Node",
            Component::Registry => "Registry",
            Component::Registrar => "Registrar",
            Component::Invoker => "Invoker",
            Component::Transport => "Transport",
            Component::Listener => "Listener",
            Component::Proxy => "Proxy",
            Component::Custom(name) => name,
        }
    }

    /// Log target for this component, e.g. `cluster::registrar`
    pub fn target(&self) -> String {
        format!("{TARGET_PREFIX}::{}", self.as_str().to_lowercase())
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Lightweight Display helper to avoid prefix String allocations
struct PrefixDisplay<'a> {
    parent: Option<Component>,
    component: Component,
    path: Option<&'a str>,
}

impl Display for PrefixDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) if parent != Component::Node => {
                write!(f, "{}.{}", parent.as_str(), self.component.as_str())?
            }
            _ => write!(f, "{}", self.component.as_str())?,
        }
        if let Some(path) = self.path {
            write!(f, "|path={path}")?;
        }
        Ok(())
    }
}

/// A helper for creating component-specific loggers with node ID tracking
#[derive(Clone, Debug)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Node ID for distributed tracing
    node_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
    /// Route path for invocation tracing
    route_path: Option<String>,
}

impl Logger {
    /// Create a new root logger for a specific component and node ID
    pub fn new_root(component: Component, node_id: &str) -> Self {
        Self {
            component,
            node_id: node_id.to_string(),
            parent_component: None,
            route_path: None,
        }
    }

    /// Create a child logger with the same node ID but different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            node_id: self.node_id.clone(),
            parent_component: Some(self.component),
            route_path: self.route_path.clone(),
        }
    }

    /// Create a logger that tags every line with a route path
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            route_path: Some(path.into()),
            ..self.clone()
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn route_path(&self) -> Option<&str> {
        self.route_path.as_deref()
    }

    fn emit(&self, level: Level, args: Arguments) {
        let target = self.component.target();
        if !log_enabled!(target: &target, level) {
            return;
        }
        // Skip displaying the component if it's the root Node to avoid redundancy
        if self.component == Component::Node
            && self.parent_component.is_none()
            && self.route_path.is_none()
        {
            log!(target: &target, level, "[{}] {}", self.node_id, args);
        } else {
            log!(
                target: &target,
                level,
                "[{}][{}] {}",
                self.node_id,
                PrefixDisplay {
                    parent: self.parent_component,
                    component: self.component,
                    path: self.route_path(),
                },
                args
            );
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(Level::Debug, format_args!("{}", message.into()));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Level::Info, format_args!("{}", message.into()));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(Level::Warn, format_args!("{}", message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(Level::Error, format_args!("{}", message.into()));
    }

    /// Log a debug message using fmt::Arguments (avoids allocating message String)
    pub fn debug_args(&self, args: Arguments) {
        self.emit(Level::Debug, args);
    }
}

/// Log levels accepted by [`LoggingConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Off => LevelFilter::Off,
        }
    }
}

/// Logging configuration: a default level plus per-component overrides
///
/// Component overrides are keyed by component name (`"Registrar"`, `"Listener"`, ...) so the
/// configuration can be deserialized from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub default_level: LogLevel,
    #[serde(default)]
    pub component_levels: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::default_info()
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default_info()
    }

    pub fn default_info() -> Self {
        Self {
            default_level: LogLevel::Info,
            component_levels: HashMap::new(),
        }
    }

    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    pub fn with_component_level(mut self, component: Component, level: LogLevel) -> Self {
        self.component_levels
            .insert(component.as_str().to_string(), level);
        self
    }

    /// Effective level for a component
    pub fn level_for(&self, component: Component) -> LogLevel {
        self.component_levels
            .get(component.as_str())
            .copied()
            .unwrap_or(self.default_level)
    }

    /// Install an env_logger backend with these filters.
    ///
    /// Only the first call in a process installs a logger; later calls are ignored.
    pub fn apply(&self) {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.default_level.to_level_filter());
        for (component, level) in &self.component_levels {
            let target = format!("{TARGET_PREFIX}::{}", component.to_lowercase());
            builder.filter_module(&target, level.to_level_filter());
        }
        let _ = builder.is_test(cfg!(test)).try_init();
    }
}
