// Wire codec for registrar-to-registrar messages
//
// Every message travels inside an envelope naming the sending registrar and is encoded as
// JSON. Replies carry the full `Result`, so a callee's failure kind is preserved.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::NodeRef;
use crate::error::RegistryError;
use crate::routing::RoutePath;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// The sender hosts these paths
    Announce { paths: Vec<RoutePath> },
    /// The sender no longer hosts these paths
    Withdraw { paths: Vec<RoutePath> },
    /// Invoke a path hosted by the receiver
    Invoke {
        request_id: Uuid,
        path: RoutePath,
        args: Vec<Value>,
        timeout_ms: u64,
    },
    /// Outcome of an earlier `Invoke`
    Reply {
        request_id: Uuid,
        result: Result<Value, RegistryError>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub from: NodeRef,
    pub message: WireMessage,
}

impl WireEnvelope {
    pub fn new(from: NodeRef, message: WireMessage) -> Self {
        Self { from, message }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to encode wire envelope")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to decode wire envelope")
    }
}
