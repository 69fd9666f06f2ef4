// Route listener dispatch
//
// INTENTION: Tell interested local code when routes become reachable or go away, without ever
// running that code on the registrar. The registrar pushes `RouteEvent`s into a channel; a
// dedicated dispatcher thread delivers each event to a snapshot of the listener set taken when
// the event's delivery starts. Listeners added later miss that event, removed ones may still
// see it. A panicking listener is logged and skipped.

use arc_swap::ArcSwap;
use cluster_common::logging::Logger;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::network::NodeRef;
use crate::routing::RoutePath;

/// Callback for route lifecycle events
pub trait RouteListener: Send + Sync {
    /// A path became reachable
    fn on_announcement(&self, path: &RoutePath);

    /// A route for `path` hosted by `node` went away
    fn on_terminated(&self, path: &RoutePath, node: &NodeRef);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteEvent {
    Announced(RoutePath),
    Terminated(RoutePath, NodeRef),
}

/// Copy-on-write set of listeners
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: ArcSwap<Vec<Arc<dyn RouteListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn RouteListener>) {
        self.listeners.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(listener.clone());
            next
        });
    }

    /// Remove by identity; returns whether the listener was present
    pub fn remove(&self, listener: &Arc<dyn RouteListener>) -> bool {
        let previous = self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|l| !Arc::ptr_eq(l, listener))
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|l| Arc::ptr_eq(l, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners.load().len()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<dyn RouteListener>>> {
        self.listeners.load_full()
    }
}

/// Deliver one event to every listener in the current snapshot
pub(crate) fn deliver(listeners: &ListenerSet, event: &RouteEvent, logger: &Logger) {
    for listener in listeners.snapshot().iter() {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| match event {
            RouteEvent::Announced(path) => listener.on_announcement(path),
            RouteEvent::Terminated(path, node) => listener.on_terminated(path, node),
        }));
        if outcome.is_err() {
            logger.error(format!("Route listener panicked while handling {event:?}"));
        }
    }
}

/// Start the dispatcher thread. It stops once every event sender is dropped.
///
/// Listener callbacks are synchronous, so they run on a thread of their own rather than on the
/// runtime driving the registrar.
pub(crate) fn spawn_dispatcher(
    listeners: Arc<ListenerSet>,
    mut events: mpsc::UnboundedReceiver<RouteEvent>,
    logger: Logger,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("route-listeners".into())
        .spawn(move || {
            while let Some(event) = events.blocking_recv() {
                logger.debug(format!("Dispatching {event:?}"));
                deliver(&listeners, &event, &logger);
            }
            logger.debug("Route event dispatcher stopped");
        })
}
