// Host process
//
// INTENTION: Bundle what a registry needs from the process hosting it: the cluster transport,
// the runtime its background tasks are spawned on, and the root logger of the node.

use cluster_common::logging::{Component, Logger};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use crate::error::RegistryError;
use crate::network::ClusterTransport;

#[derive(Clone)]
pub struct ClusterHost {
    transport: Arc<dyn ClusterTransport>,
    runtime: Handle,
    logger: Logger,
}

impl ClusterHost {
    pub fn new(transport: Arc<dyn ClusterTransport>, runtime: Handle, logger: Logger) -> Self {
        Self {
            transport,
            runtime,
            logger,
        }
    }

    /// Host on the runtime of the calling task, logging as the transport's node
    pub fn current(transport: Arc<dyn ClusterTransport>) -> Result<Self, RegistryError> {
        let runtime = Handle::try_current().map_err(|e| RegistryError::HostTask(e.to_string()))?;
        let logger = Logger::new_root(Component::Node, transport.local_node_id());
        Ok(Self::new(transport, runtime, logger))
    }

    pub fn transport(&self) -> &Arc<dyn ClusterTransport> {
        &self.transport
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn node_id(&self) -> &str {
        self.transport.local_node_id()
    }

    /// Run blocking work on the host's worker pool, giving up after `timeout`.
    ///
    /// A timed out closure keeps running to completion; only its result is discarded.
    pub async fn run_blocking<F, R>(&self, work: F, timeout: Duration) -> Result<R, RegistryError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let task = self.runtime.spawn_blocking(work);
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RegistryError::HostTask(e.to_string())),
            Err(_) => Err(RegistryError::HostTask(format!(
                "blocking task timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

impl std::fmt::Debug for ClusterHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHost")
            .field("node_id", &self.node_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MemoryCluster;

    fn host() -> ClusterHost {
        let cluster = MemoryCluster::new(Logger::new_root(Component::Transport, "test"));
        ClusterHost::current(cluster.join("node-a")).unwrap()
    }

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let host = host();
        assert_eq!(host.node_id(), "node-a");
        let value = host
            .run_blocking(|| 6 * 7, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_blocking_reports_panic_and_timeout() {
        let host = host();
        let panicked = host
            .run_blocking(|| -> i32 { panic!("worker failure") }, Duration::from_secs(1))
            .await;
        assert!(matches!(panicked, Err(RegistryError::HostTask(_))));

        let slow = host
            .run_blocking(
                || std::thread::sleep(Duration::from_millis(200)),
                Duration::from_millis(20),
            )
            .await;
        assert!(matches!(slow, Err(RegistryError::HostTask(_))));
    }

    #[test]
    fn test_current_requires_runtime() {
        let cluster = MemoryCluster::new(Logger::new_root(Component::Transport, "test"));
        assert!(matches!(
            ClusterHost::current(cluster.join("node-a")),
            Err(RegistryError::HostTask(_))
        ));
    }
}
