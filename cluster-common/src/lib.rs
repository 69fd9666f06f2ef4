//! Cluster Common
//!
//! Common utilities shared by the cluster registry crates.
//!
//! This crate provides component-based structured logging with node ID context.

pub mod logging;

// Re-export traits and types at the root level
pub use logging::{Component, LogLevel, Logger, LoggingConfig};
