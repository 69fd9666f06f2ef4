// Memory-based Cluster Transport
//
// INTENTION: Provide an in-process cluster for development and testing. Every joined node
// gets a `MemoryTransport`; subscribing to it makes the node a live member that receives
// membership events and payloads from the other live members. `leave` confirms a node's loss
// to the survivors, while `isolate` silently drops its traffic so peers only notice through
// timeouts.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use cluster_common::logging::Logger;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{ClusterTransport, TransportEvent};

#[derive(Default)]
struct Member {
    inbox: Option<mpsc::UnboundedSender<TransportEvent>>,
    isolated: bool,
}

/// A set of in-process nodes that can reach each other
#[derive(Clone)]
pub struct MemoryCluster {
    members: Arc<DashMap<String, Member>>,
    logger: Logger,
}

impl MemoryCluster {
    pub fn new(logger: Logger) -> Self {
        Self {
            members: Arc::new(DashMap::new()),
            logger,
        }
    }

    /// Add a node to the cluster and return its transport.
    ///
    /// The node becomes visible to peers once its transport is subscribed.
    pub fn join(&self, node_id: impl Into<String>) -> Arc<MemoryTransport> {
        let node_id = node_id.into();
        self.members.entry(node_id.clone()).or_default();
        self.logger.debug(format!("Node {node_id} joined the memory cluster"));
        Arc::new(MemoryTransport {
            node_id,
            cluster: self.clone(),
        })
    }

    /// Remove a node. Every remaining live member observes `MemberDown`.
    pub fn leave(&self, node_id: &str) {
        if self.members.remove(node_id).is_none() {
            return;
        }
        self.logger.info(format!("Node {node_id} left the memory cluster"));
        for inbox in self.live_inboxes(node_id) {
            let _ = inbox.send(TransportEvent::MemberDown(node_id.to_string()));
        }
    }

    /// Drop all traffic to and from a node without reporting it down
    pub fn isolate(&self, node_id: &str) {
        if let Some(mut member) = self.members.get_mut(node_id) {
            member.isolated = true;
            self.logger.info(format!("Node {node_id} isolated"));
        }
    }

    /// Identifiers of the current members, sorted
    pub fn members(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.members.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn live_inboxes(&self, except: &str) -> Vec<mpsc::UnboundedSender<TransportEvent>> {
        self.members
            .iter()
            .filter(|e| e.key() != except)
            .filter_map(|e| e.value().inbox.clone())
            .collect()
    }

    fn attach(&self, node_id: &str) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut member = self
                .members
                .get_mut(node_id)
                .ok_or_else(|| anyhow!("Node {node_id} is not a member of the cluster"))?;
            if member.inbox.is_some() {
                return Err(anyhow!("Node {node_id} already has a subscriber"));
            }
            member.inbox = Some(tx.clone());
        }

        // Introduce the new member and the existing ones to each other
        let peers: Vec<(String, mpsc::UnboundedSender<TransportEvent>)> = self
            .members
            .iter()
            .filter(|e| e.key() != node_id)
            .filter_map(|e| e.value().inbox.clone().map(|inbox| (e.key().clone(), inbox)))
            .collect();
        for (peer_id, inbox) in peers {
            let _ = inbox.send(TransportEvent::MemberUp(node_id.to_string()));
            let _ = tx.send(TransportEvent::MemberUp(peer_id));
        }
        self.logger.debug(format!("Node {node_id} subscribed"));
        Ok(rx)
    }

    fn deliver(&self, from: &str, to: &str, payload: Vec<u8>) -> Result<()> {
        let sender_isolated = self.members.get(from).map(|m| m.isolated).unwrap_or(true);
        let inbox = {
            let member = self
                .members
                .get(to)
                .ok_or_else(|| anyhow!("Node {to} is not reachable"))?;
            if sender_isolated || member.isolated {
                self.logger
                    .debug(format!("Dropping message {from} -> {to}: node isolated"));
                return Ok(());
            }
            member
                .inbox
                .clone()
                .ok_or_else(|| anyhow!("Node {to} is not subscribed"))?
        };
        inbox
            .send(TransportEvent::Message {
                from: from.to_string(),
                payload,
            })
            .map_err(|_| anyhow!("Node {to} stopped receiving"))
    }
}

/// Transport of one node in a [`MemoryCluster`]
pub struct MemoryTransport {
    node_id: String,
    cluster: MemoryCluster,
}

#[async_trait]
impl ClusterTransport for MemoryTransport {
    fn local_node_id(&self) -> &str {
        &self.node_id
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        self.cluster.attach(&self.node_id)
    }

    async fn send(&self, node_id: &str, payload: Vec<u8>) -> Result<()> {
        self.cluster.deliver(&self.node_id, node_id, payload)
    }
}
