// Registrar
//
// INTENTION: Be the single writer of a node's routing table. One registrar task runs per node
// and processes registry commands, transport membership events, peer messages and local
// completions one at a time. Nothing else mutates the table, so no locks guard it.
//
// Route lifecycle as seen by listeners:
// - `Announced(path)` when a path goes from no reachable route to at least one
// - `Terminated(path, node)` when one node's route for a path is removed
// Repeated announcements or withdrawals of the same (path, node) change nothing and emit
// nothing.
//
// Replica selection: round robin per path over the reachable routes sorted by `NodeRef`.

use cluster_common::logging::Logger;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::events::{RegistrarCommand, Reply};
use super::listener::RouteEvent;
use super::pending::{Completion, PendingInvocation, PendingTable};
use super::response::whole_millis;
use super::{CallHandler, Response};
use crate::error::{InvocationError, RegistryError};
use crate::network::{ClusterTransport, NodeRef, TransportEvent, WireEnvelope, WireMessage};
use crate::routing::RoutePath;

/// How often expired pending invocations are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) struct Registrar {
    node: NodeRef,
    transport: Arc<dyn ClusterTransport>,
    local: HashMap<RoutePath, CallHandler>,
    remote: HashMap<RoutePath, BTreeSet<NodeRef>>,
    members: BTreeSet<String>,
    cursors: HashMap<RoutePath, usize>,
    pending: PendingTable,
    route_events: mpsc::UnboundedSender<RouteEvent>,
    completions: mpsc::UnboundedSender<RegistrarCommand>,
    runtime: Handle,
    logger: Logger,
}

impl Registrar {
    pub fn new(
        node: NodeRef,
        transport: Arc<dyn ClusterTransport>,
        route_events: mpsc::UnboundedSender<RouteEvent>,
        runtime: Handle,
        logger: Logger,
    ) -> (Self, mpsc::UnboundedReceiver<RegistrarCommand>) {
        let (completions, completions_rx) = mpsc::unbounded_channel();
        let registrar = Self {
            node,
            transport,
            local: HashMap::new(),
            remote: HashMap::new(),
            members: BTreeSet::new(),
            cursors: HashMap::new(),
            pending: PendingTable::new(),
            route_events,
            completions,
            runtime,
            logger,
        };
        (registrar, completions_rx)
    }

    /// Process messages until shutdown or until every command sender is gone
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<RegistrarCommand>,
        mut completions: mpsc::UnboundedReceiver<RegistrarCommand>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        self.logger.info(format!("Registrar {} started", self.node));
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut transport_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RegistrarCommand::Shutdown { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(command) = completions.recv() => self.handle_command(command),
                event = transport_events.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => {
                        self.logger.warn("Transport event stream closed");
                        transport_open = false;
                    }
                },
                _ = sweep.tick() => {
                    let expired = self.pending.expire(Instant::now());
                    if expired > 0 {
                        self.logger.debug(format!("Expired {expired} pending invocations"));
                    }
                }
            }
        }
        self.logger.info(format!("Registrar {} stopped", self.node));
    }

    fn handle_command(&mut self, command: RegistrarCommand) {
        match command {
            RegistrarCommand::Register {
                entries,
                replace,
                reply,
            } => self.register(entries, replace, reply),
            RegistrarCommand::Unregister { paths, reply } => {
                let removed = self.unregister(paths);
                let _ = reply.send(removed);
            }
            RegistrarCommand::Routes { path, reply } => {
                let _ = reply.send(self.candidates(&path));
            }
            RegistrarCommand::Invoke {
                request_id,
                path,
                args,
                timeout_ms,
                deadline,
                reply,
            } => self.invoke(request_id, path, args, timeout_ms, deadline, reply),
            RegistrarCommand::Cancel { request_id } => {
                if self.pending.cancel(&request_id) {
                    self.logger
                        .debug(format!("Cancelled pending invocation {request_id}"));
                }
            }
            RegistrarCommand::Complete { request_id, result } => {
                self.complete(request_id, result)
            }
            RegistrarCommand::Shutdown { reply } => {
                // handled by the run loop; answer anyway so the caller never hangs
                let _ = reply.send(());
            }
        }
    }

    fn is_reachable(&self, path: &RoutePath) -> bool {
        self.local.contains_key(path) || self.remote.get(path).is_some_and(|n| !n.is_empty())
    }

    /// Reachable routes of a path, sorted
    fn candidates(&self, path: &RoutePath) -> Vec<NodeRef> {
        let mut nodes: BTreeSet<NodeRef> = self.remote.get(path).cloned().unwrap_or_default();
        if self.local.contains_key(path) {
            nodes.insert(self.node.clone());
        }
        nodes.into_iter().collect()
    }

    fn select(&mut self, path: &RoutePath) -> Option<NodeRef> {
        let candidates = self.candidates(path);
        if candidates.is_empty() {
            return None;
        }
        let cursor = self.cursors.entry(path.clone()).or_insert(0);
        let chosen = candidates[*cursor % candidates.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Some(chosen)
    }

    fn emit(&self, event: RouteEvent) {
        if self.route_events.send(event).is_err() {
            self.logger.warn("Route event dispatcher is gone");
        }
    }

    /// A route of `path` at `node` was removed
    fn terminated(&mut self, path: RoutePath, node: NodeRef) {
        if !self.is_reachable(&path) {
            self.cursors.remove(&path);
        }
        self.emit(RouteEvent::Terminated(path, node));
    }

    fn register(
        &mut self,
        entries: Vec<(RoutePath, CallHandler)>,
        replace: bool,
        reply: Reply<Result<(), RegistryError>>,
    ) {
        if !replace {
            let mut seen = BTreeSet::new();
            for (path, _) in &entries {
                if self.local.contains_key(path) || !seen.insert(path) {
                    let _ = reply.send(Err(RegistryError::AlreadyBound(path.to_string())));
                    return;
                }
            }
        }

        let mut added = Vec::new();
        for (path, handler) in entries {
            let was_reachable = self.is_reachable(&path);
            if self.local.insert(path.clone(), handler).is_none() {
                self.logger.debug(format!("Registered {path}"));
                if !was_reachable {
                    self.emit(RouteEvent::Announced(path.clone()));
                }
                added.push(path);
            } else {
                self.logger.debug(format!("Replaced handler of {path}"));
            }
        }
        if !added.is_empty() {
            self.broadcast(WireMessage::Announce { paths: added });
        }
        let _ = reply.send(Ok(()));
    }

    fn unregister(&mut self, paths: Vec<RoutePath>) -> Vec<RoutePath> {
        let mut removed = Vec::new();
        for path in paths {
            if self.local.remove(&path).is_some() {
                self.logger.debug(format!("Unregistered {path}"));
                self.terminated(path.clone(), self.node.clone());
                removed.push(path);
            }
        }
        if !removed.is_empty() {
            self.broadcast(WireMessage::Withdraw {
                paths: removed.clone(),
            });
        }
        removed
    }

    fn invoke(
        &mut self,
        request_id: Uuid,
        path: RoutePath,
        args: Vec<Value>,
        timeout_ms: u64,
        deadline: Instant,
        reply: Reply<Result<Response, RegistryError>>,
    ) {
        let Some(target) = self.select(&path) else {
            self.logger.debug(format!("No route for {path}"));
            let _ = reply.send(Err(RegistryError::RouteNotFound(path.to_string())));
            return;
        };
        self.pending.insert(
            request_id,
            PendingInvocation {
                path: path.clone(),
                target: target.clone(),
                deadline,
                timeout_ms,
                reply,
            },
        );
        self.logger.debug(format!(
            "Routing request {request_id} for {path} to {target}, {} pending",
            self.pending.len()
        ));

        if target == self.node {
            // select() only yields the local node when a handler is bound
            let Some(handler) = self.local.get(&path).cloned() else {
                self.complete(request_id, Err(RegistryError::RouteNotFound(path.to_string())));
                return;
            };
            let completions = self.completions.clone();
            let caller = self.node.clone();
            self.runtime.spawn(async move {
                let outcome = tokio::time::timeout_at(deadline, handler(caller, args)).await;
                let result = invocation_outcome(&path, timeout_ms, outcome);
                let _ = completions.send(RegistrarCommand::Complete { request_id, result });
            });
        } else {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = WireMessage::Invoke {
                request_id,
                path,
                args,
                timeout_ms: whole_millis(remaining),
            };
            self.send(target.node_id().to_string(), message, Some(request_id));
        }
    }

    fn complete(&mut self, request_id: Uuid, result: Result<Value, RegistryError>) {
        match self.pending.complete(&request_id, result, Instant::now()) {
            Completion::Delivered => {}
            Completion::Late => self
                .logger
                .warn(format!("Discarded late reply for request {request_id}")),
            Completion::Unknown => self.logger.debug(format!(
                "Reply for unknown or cancelled request {request_id}"
            )),
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::MemberUp(node_id) => self.member_up(node_id),
            TransportEvent::MemberDown(node_id) => self.member_down(&node_id),
            TransportEvent::Message { from, payload } => match WireEnvelope::decode(&payload) {
                Ok(envelope) => self.handle_message(envelope),
                Err(e) => self
                    .logger
                    .error(format!("Dropping undecodable message from {from}: {e:#}")),
            },
        }
    }

    fn member_up(&mut self, node_id: String) {
        if self.introduce(&node_id) {
            self.logger.info(format!("Peer {node_id} is up"));
        }
    }

    /// Record a peer. One seen for the first time is told about every local route, whether it
    /// showed up through membership or through a message.
    fn introduce(&mut self, node_id: &str) -> bool {
        if node_id == self.node.node_id() || !self.members.insert(node_id.to_string()) {
            return false;
        }
        if !self.local.is_empty() {
            let paths: Vec<RoutePath> = self.local.keys().cloned().collect();
            self.send(node_id.to_string(), WireMessage::Announce { paths }, None);
        }
        true
    }

    fn member_down(&mut self, node_id: &str) {
        let was_member = self.members.remove(node_id);
        let mut lost = Vec::new();
        self.remote.retain(|path, nodes| {
            nodes.retain(|node| {
                if node.node_id() == node_id {
                    lost.push((path.clone(), node.clone()));
                    false
                } else {
                    true
                }
            });
            !nodes.is_empty()
        });
        if !was_member && lost.is_empty() {
            return;
        }
        self.logger.info(format!(
            "Peer {node_id} is down, {} routes lost",
            lost.len()
        ));
        for (path, node) in lost {
            self.terminated(path, node);
        }
        let failed = self.pending.fail_node(node_id);
        if failed > 0 {
            self.logger.debug(format!(
                "Failed {failed} in-flight invocations routed to {node_id}"
            ));
        }
    }

    fn handle_message(&mut self, envelope: WireEnvelope) {
        let WireEnvelope { from, message } = envelope;
        if self.introduce(from.node_id()) {
            self.logger
                .debug(format!("Heard from {from} before its membership event"));
        }
        match message {
            WireMessage::Announce { paths } => {
                for path in paths {
                    let was_reachable = self.is_reachable(&path);
                    if self.remote.entry(path.clone()).or_default().insert(from.clone()) {
                        self.logger.debug(format!("{from} announced {path}"));
                        if !was_reachable {
                            self.emit(RouteEvent::Announced(path));
                        }
                    }
                }
            }
            WireMessage::Withdraw { paths } => {
                for path in paths {
                    let removed = match self.remote.get_mut(&path) {
                        Some(nodes) => {
                            let removed = nodes.remove(&from);
                            if nodes.is_empty() {
                                self.remote.remove(&path);
                            }
                            removed
                        }
                        None => false,
                    };
                    if removed {
                        self.logger.debug(format!("{from} withdrew {path}"));
                        self.terminated(path, from.clone());
                    }
                }
            }
            WireMessage::Invoke {
                request_id,
                path,
                args,
                timeout_ms,
            } => self.serve_remote(from, request_id, path, args, timeout_ms),
            WireMessage::Reply { request_id, result } => self.complete(request_id, result),
        }
    }

    /// Run a request from a peer against the local handler and send the reply back
    fn serve_remote(
        &mut self,
        caller: NodeRef,
        request_id: Uuid,
        path: RoutePath,
        args: Vec<Value>,
        timeout_ms: u64,
    ) {
        let Some(handler) = self.local.get(&path).cloned() else {
            self.logger
                .debug(format!("{caller} invoked {path}, which is not bound here"));
            let result = Err(RegistryError::RouteNotFound(path.to_string()));
            self.send(
                caller.node_id().to_string(),
                WireMessage::Reply { request_id, result },
                None,
            );
            return;
        };

        let envelope_from = self.node.clone();
        let transport = self.transport.clone();
        let logger = self.logger.with_path(path.as_str());
        self.runtime.spawn(async move {
            let outcome =
                tokio::time::timeout(Duration::from_millis(timeout_ms), handler(caller.clone(), args))
                    .await;
            let result = invocation_outcome(&path, timeout_ms, outcome);
            let reply = WireEnvelope::new(envelope_from, WireMessage::Reply { request_id, result });
            let delivered = match reply.encode() {
                Ok(payload) => transport.send(caller.node_id(), payload).await,
                Err(e) => Err(e),
            };
            if let Err(e) = delivered {
                logger.warn(format!("Could not reply to {caller}: {e:#}"));
            }
        });
    }

    fn broadcast(&self, message: WireMessage) {
        for node_id in &self.members {
            self.send(node_id.clone(), message.clone(), None);
        }
    }

    /// Send a message to a peer without blocking the registrar. A failed send of an
    /// invocation completes that invocation with a transport error.
    fn send(&self, node_id: String, message: WireMessage, request_id: Option<Uuid>) {
        let payload = match WireEnvelope::new(self.node.clone(), message).encode() {
            Ok(payload) => payload,
            Err(e) => {
                self.logger.error(format!("Could not encode message: {e:#}"));
                if let Some(request_id) = request_id {
                    let _ = self.completions.send(RegistrarCommand::Complete {
                        request_id,
                        result: Err(RegistryError::Transport(format!("{e:#}"))),
                    });
                }
                return;
            }
        };
        let transport = self.transport.clone();
        let completions = self.completions.clone();
        let logger = self.logger.clone();
        self.runtime.spawn(async move {
            if let Err(e) = transport.send(&node_id, payload).await {
                logger.warn(format!("Send to {node_id} failed: {e:#}"));
                if let Some(request_id) = request_id {
                    let _ = completions.send(RegistrarCommand::Complete {
                        request_id,
                        result: Err(RegistryError::Transport(format!("{e:#}"))),
                    });
                }
            }
        });
    }

    /// Withdraw every local route, fail whatever is in flight and stop
    async fn stop(&mut self) {
        let failed = self.pending.fail_all(RegistryError::RegistryClosed);
        if failed > 0 {
            self.logger
                .debug(format!("Failed {failed} pending invocations on shutdown"));
        }

        let paths: Vec<RoutePath> = self.local.keys().cloned().collect();
        if !paths.is_empty() {
            // Sent inline so peers hear about it before the registrar is gone
            let message = WireMessage::Withdraw {
                paths: paths.clone(),
            };
            match WireEnvelope::new(self.node.clone(), message).encode() {
                Ok(payload) => {
                    for node_id in &self.members {
                        if let Err(e) = self.transport.send(node_id, payload.clone()).await {
                            self.logger
                                .warn(format!("Withdraw to {node_id} failed: {e:#}"));
                        }
                    }
                }
                Err(e) => self.logger.error(format!("Could not encode withdraw: {e:#}")),
            }
        }
        for path in paths {
            self.local.remove(&path);
            self.terminated(path, self.node.clone());
        }
    }
}

fn invocation_outcome(
    path: &RoutePath,
    timeout_ms: u64,
    outcome: Result<Result<Value, InvocationError>, tokio::time::error::Elapsed>,
) -> Result<Value, RegistryError> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(RegistryError::RemoteInvocationFailure {
            path: path.to_string(),
            source,
        }),
        Err(_) => Err(RegistryError::InvocationTimeout {
            path: path.to_string(),
            timeout_ms,
        }),
    }
}
