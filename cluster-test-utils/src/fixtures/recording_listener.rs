// Route listener that records every event it receives

use cluster_registry::{NodeRef, RouteEvent, RouteListener, RoutePath};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RouteEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RouteEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events concerning one path, in delivery order
    pub fn events_for(&self, path: &RoutePath) -> Vec<RouteEvent> {
        self.events()
            .into_iter()
            .filter(|event| match event {
                RouteEvent::Announced(p) | RouteEvent::Terminated(p, _) => p == path,
            })
            .collect()
    }

    /// Wait until at least `count` events were recorded
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        crate::eventually(timeout, move || async move { self.events().len() >= count }).await
    }

    fn record(&self, event: RouteEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl RouteListener for RecordingListener {
    fn on_announcement(&self, path: &RoutePath) {
        self.record(RouteEvent::Announced(path.clone()));
    }

    fn on_terminated(&self, path: &RoutePath, node: &NodeRef) {
        self.record(RouteEvent::Terminated(path.clone(), node.clone()));
    }
}
