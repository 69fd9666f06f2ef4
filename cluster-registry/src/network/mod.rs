// Network Module
//
// INTENTION: Define the boundary to the cluster transport. The registry only needs an
// addressable node handle, a way to send bytes to a peer, and a stream of membership and
// inbound message events. Real transports plug in behind `ClusterTransport`; `MemoryCluster`
// is the in-process implementation used for development and tests.

pub mod codec;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub use codec::{WireEnvelope, WireMessage};
pub use memory::{MemoryCluster, MemoryTransport};

/// Addressable handle of a node's registrar
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    node_id: String,
    registrar: String,
}

impl NodeRef {
    pub fn new(node_id: impl Into<String>, registrar: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            registrar: registrar.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registrar(&self) -> &str {
        &self.registrar
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_id, self.registrar)
    }
}

/// Events delivered by a transport to its single subscriber, in observation order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer node became reachable
    MemberUp(String),
    /// A peer node left or crashed
    MemberDown(String),
    /// Encoded payload sent by a peer
    Message { from: String, payload: Vec<u8> },
}

/// The cluster transport consumed by the registrar
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Identifier of the node this transport belongs to
    fn local_node_id(&self) -> &str;

    /// Take the event stream of this node. A transport has a single subscriber.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Send an encoded payload to a peer node
    async fn send(&self, node_id: &str, payload: Vec<u8>) -> Result<()>;
}
