// Test utilities for the cluster registry crates
//
// This crate provides test-specific functionality that should not be available
// in production builds. All functions in this crate are for testing only.

pub mod fixtures;

use anyhow::Result;
use cluster_common::logging::{Component, LogLevel, Logger, LoggingConfig};
use cluster_registry::{ClusterHost, MemoryCluster, Registry, RegistryConfig};
use std::future::Future;
use std::time::Duration;

/// Default invocation timeout used by test registries
pub const TEST_TIMEOUT_MS: u64 = 1_000;

/// Create a registry configuration suitable for tests
pub fn create_test_config(node_name: &str) -> RegistryConfig {
    RegistryConfig::new(node_name)
        .with_default_timeout(TEST_TIMEOUT_MS)
        .with_logging_config(test_logging_config())
}

/// Logging for tests: warnings by default, registrar traffic at debug
pub fn test_logging_config() -> LoggingConfig {
    LoggingConfig::new()
        .with_default_level(LogLevel::Warn)
        .with_component_level(Component::Registrar, LogLevel::Debug)
}

/// Install the test logger once per process
pub fn init_test_logging() {
    test_logging_config().apply();
}

/// Create an empty in-memory cluster
pub fn create_test_cluster() -> MemoryCluster {
    MemoryCluster::new(Logger::new_root(Component::Transport, "memory-cluster"))
}

/// A started registry and the host it runs on
pub struct TestNode {
    pub registry: Registry,
    pub host: ClusterHost,
}

impl TestNode {
    pub fn node_id(&self) -> &str {
        self.host.node_id()
    }
}

/// Join `node_id` to the cluster and start a registry for it on the current runtime
pub async fn start_test_node(cluster: &MemoryCluster, node_id: &str) -> Result<TestNode> {
    let host = ClusterHost::current(cluster.join(node_id))?;
    let registry = Registry::new(create_test_config(node_id));
    registry.start(&host).await?;
    Ok(TestNode { registry, host })
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
