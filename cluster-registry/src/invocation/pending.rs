// Pending invocation table
//
// Correlates in-flight requests with the caller waiting on them. A record is removed by the
// first of: its reply, a cancellation, its deadline, loss of the target node, or shutdown.
// Removal is what guarantees at most one reply per request.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::Response;
use crate::error::RegistryError;
use crate::network::NodeRef;
use crate::routing::RoutePath;

pub(crate) struct PendingInvocation {
    pub path: RoutePath,
    pub target: NodeRef,
    pub deadline: Instant,
    pub timeout_ms: u64,
    pub reply: oneshot::Sender<Result<Response, RegistryError>>,
}

impl PendingInvocation {
    fn timeout_error(&self) -> RegistryError {
        RegistryError::InvocationTimeout {
            path: self.path.to_string(),
            timeout_ms: self.timeout_ms,
        }
    }

    fn resolve(self, result: Result<Value, RegistryError>) {
        let response = result.map(|value| Response {
            path: self.path,
            value,
            node: Some(self.target),
        });
        // The caller may have stopped waiting; nothing to do then
        let _ = self.reply.send(response);
    }
}

/// What happened to a reply handed to [`PendingTable::complete`]
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Completion {
    Delivered,
    /// Arrived after the deadline and was discarded
    Late,
    /// No such request, already answered or cancelled
    Unknown,
}

#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<Uuid, PendingInvocation>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, request_id: Uuid, invocation: PendingInvocation) {
        self.entries.insert(request_id, invocation);
    }

    pub fn complete(
        &mut self,
        request_id: &Uuid,
        result: Result<Value, RegistryError>,
        now: Instant,
    ) -> Completion {
        let Some(invocation) = self.entries.remove(request_id) else {
            return Completion::Unknown;
        };
        if now > invocation.deadline {
            let error = invocation.timeout_error();
            invocation.resolve(Err(error));
            return Completion::Late;
        }
        invocation.resolve(result);
        Completion::Delivered
    }

    pub fn cancel(&mut self, request_id: &Uuid) -> bool {
        self.entries.remove(request_id).is_some()
    }

    /// Fail every request routed to `node`, returning how many were failed
    pub fn fail_node(&mut self, node_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, p)| p.target.node_id() == node_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(invocation) = self.entries.remove(id) {
                let error = RegistryError::RouteNotFound(invocation.path.to_string());
                invocation.resolve(Err(error));
            }
        }
        ids.len()
    }

    /// Fail everything with the same error
    pub fn fail_all(&mut self, error: RegistryError) -> usize {
        let count = self.entries.len();
        for (_, invocation) in self.entries.drain() {
            invocation.resolve(Err(error.clone()));
        }
        count
    }

    /// Drop records whose deadline has passed, failing them with a timeout
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(invocation) = self.entries.remove(id) {
                let error = invocation.timeout_error();
                invocation.resolve(Err(error));
            }
        }
        expired.len()
    }
}
