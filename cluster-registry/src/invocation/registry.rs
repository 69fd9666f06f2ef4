// Registry
//
// INTENTION: The public entry point of the invocation registry. It turns interface-level
// registration and invocation into path-qualified commands for the node's registrar, owns the
// route listener set and the default timeout, and manages the registrar's lifecycle.
//
// Local programming errors (invalid interface, unknown method, closed or unstarted registry)
// are returned directly. Everything that depends on the cluster arrives through futures.

use arc_swap::ArcSwap;
use cluster_common::logging::{Component, Logger};
use futures::FutureExt;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{RegistrarCommand, Reply};
use super::invoker::{DefaultInvoker, Invoker, ServiceTarget, Target};
use super::listener::{spawn_dispatcher, ListenerSet, RouteListener};
use super::proxy::ClusterAsync;
use super::registrar::Registrar;
use super::response::{deadline_after, whole_millis, ResponseFuture};
use super::CallHandler;
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::host::ClusterHost;
use crate::network::NodeRef;
use crate::routing::{Interface, MethodSignature, RoutePath};

#[derive(Clone)]
struct Running {
    node: NodeRef,
    commands: mpsc::UnboundedSender<RegistrarCommand>,
}

enum RegistryState {
    Idle,
    Running(Running),
    Closed,
}

#[derive(Default)]
struct Workers {
    registrar: Option<JoinHandle<()>>,
    dispatcher: Option<std::thread::JoinHandle<()>>,
}

struct RegistryInner {
    config: RegistryConfig,
    logger: Logger,
    timeout_ms: AtomicU64,
    state: ArcSwap<RegistryState>,
    /// Serializes start and shutdown; holds the background workers
    lifecycle: Mutex<Workers>,
    listeners: Arc<ListenerSet>,
}

/// Handle on a node's invocation registry. Clones share the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        if let Some(logging_config) = &config.logging_config {
            logging_config.apply();
        }
        let logger = Logger::new_root(Component::Registry, &config.node_name);
        Self {
            inner: Arc::new(RegistryInner {
                timeout_ms: AtomicU64::new(config.default_timeout_ms),
                config,
                logger,
                state: ArcSwap::from_pointee(RegistryState::Idle),
                lifecycle: Mutex::new(Workers::default()),
                listeners: Arc::new(ListenerSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Start the registrar on the given host
    pub async fn start(&self, host: &ClusterHost) -> Result<(), RegistryError> {
        let mut workers = self.inner.lifecycle.lock().await;
        match &**self.inner.state.load() {
            RegistryState::Idle => {}
            RegistryState::Running(_) => return Err(RegistryError::AlreadyStarted),
            RegistryState::Closed => return Err(RegistryError::RegistryClosed),
        }

        let transport_events = host
            .transport()
            .subscribe()
            .map_err(|e| RegistryError::Transport(format!("{e:#}")))?;
        let node = NodeRef::new(host.node_id(), self.inner.config.registrar_name.clone());

        let (route_events, route_events_rx) = mpsc::unbounded_channel();
        workers.dispatcher = Some(
            spawn_dispatcher(
                self.inner.listeners.clone(),
                route_events_rx,
                host.logger().with_component(Component::Listener),
            )
            .map_err(|e| RegistryError::HostTask(format!("route listener dispatcher: {e}")))?,
        );

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (registrar, completions_rx) = Registrar::new(
            node.clone(),
            host.transport().clone(),
            route_events,
            host.runtime().clone(),
            host.logger().with_component(Component::Registrar),
        );
        workers.registrar = Some(
            host.runtime()
                .spawn(registrar.run(commands_rx, completions_rx, transport_events)),
        );

        self.inner
            .state
            .store(Arc::new(RegistryState::Running(Running { node, commands })));
        self.inner
            .logger
            .info(format!("Registry started: {}", self.inner.config));
        Ok(())
    }

    /// Stop the registrar. Later calls fail with `RegistryClosed`; repeated shutdowns are no-ops.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        let mut workers = self.inner.lifecycle.lock().await;
        let previous = self.inner.state.swap(Arc::new(RegistryState::Closed));
        let RegistryState::Running(running) = &*previous else {
            return Ok(());
        };

        let ask_timeout = self.inner.config.ask_timeout();
        let (reply, stopped) = oneshot::channel();
        if running
            .commands
            .send(RegistrarCommand::Shutdown { reply })
            .is_ok()
            && tokio::time::timeout(ask_timeout, stopped).await.is_err()
        {
            self.inner
                .logger
                .warn("Registrar did not acknowledge shutdown in time");
        }

        if let Some(mut registrar) = workers.registrar.take() {
            if tokio::time::timeout(ask_timeout, &mut registrar).await.is_err() {
                registrar.abort();
            }
        }
        // The dispatcher ends once the registrar has dropped its event sender
        if let Some(dispatcher) = workers.dispatcher.take() {
            let joined = tokio::task::spawn_blocking(move || dispatcher.join());
            if tokio::time::timeout(ask_timeout, joined).await.is_err() {
                self.inner
                    .logger
                    .warn("Route listeners still busy after shutdown");
            }
        }
        self.inner.logger.info("Registry shut down");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(&**self.inner.state.load(), RegistryState::Running(_))
    }

    /// Reference of this node's registrar
    pub fn node(&self) -> Result<NodeRef, RegistryError> {
        Ok(self.running()?.node)
    }

    /// Default invocation timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.inner.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.inner
            .timeout_ms
            .store(whole_millis(timeout), Ordering::Relaxed);
    }

    fn running(&self) -> Result<Running, RegistryError> {
        match &**self.inner.state.load() {
            RegistryState::Idle => Err(RegistryError::NotStarted),
            RegistryState::Running(running) => Ok(running.clone()),
            RegistryState::Closed => Err(RegistryError::RegistryClosed),
        }
    }

    /// Round trip to the registrar, bounded by `timeout`
    async fn ask<R>(
        &self,
        operation: &str,
        timeout: Duration,
        command: impl FnOnce(Reply<R>) -> RegistrarCommand,
    ) -> Result<R, RegistryError> {
        let running = self.running()?;
        let (reply, answer) = oneshot::channel();
        running
            .commands
            .send(command(reply))
            .map_err(|_| RegistryError::RegistryClosed)?;
        match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(RegistryError::RegistryClosed),
            Err(_) => Err(RegistryError::RegistrarTimeout {
                operation: operation.to_string(),
                timeout_ms: whole_millis(timeout),
            }),
        }
    }

    /// Register every routable method of `interface` under `qualifier`, returning the bound paths
    pub async fn register<T>(
        &self,
        qualifier: &str,
        interface: &Arc<Interface<T>>,
        implementation: Arc<T>,
    ) -> Result<Vec<RoutePath>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_with_invoker(qualifier, interface, implementation, Arc::new(DefaultInvoker))
            .await
    }

    pub async fn register_with_invoker<T>(
        &self,
        qualifier: &str,
        interface: &Arc<Interface<T>>,
        implementation: Arc<T>,
        invoker: Arc<dyn Invoker>,
    ) -> Result<Vec<RoutePath>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        ensure_routable(qualifier, interface)?;
        self.running()?;

        let target: Arc<dyn Target> =
            Arc::new(ServiceTarget::new(interface.clone(), implementation));
        let entries: Vec<(RoutePath, CallHandler)> = interface
            .routable_methods()
            .map(|method| {
                let signature = method.signature().clone();
                let path = interface.path_for(qualifier, &signature);
                (path, bind(invoker.clone(), target.clone(), signature))
            })
            .collect();
        let paths: Vec<RoutePath> = entries.iter().map(|(path, _)| path.clone()).collect();
        if entries.is_empty() {
            self.inner.logger.debug(format!(
                "{} has no routable methods, nothing registered",
                interface.name()
            ));
            return Ok(paths);
        }

        self.ask("register", self.inner.config.ask_timeout(), |reply| {
            RegistrarCommand::Register {
                entries,
                replace: false,
                reply,
            }
        })
        .await??;
        self.inner.logger.debug(format!(
            "Registered {} routes of {} under '{qualifier}'",
            paths.len(),
            interface.name()
        ));
        Ok(paths)
    }

    /// Bind a handler to a path directly, bypassing interface tables
    pub async fn register_path(
        &self,
        path: impl Into<RoutePath>,
        handler: CallHandler,
    ) -> Result<(), RegistryError> {
        self.bind_path(path.into(), handler, false).await
    }

    /// Like [`Registry::register_path`], replacing a handler already bound on this node
    pub async fn replace_path(
        &self,
        path: impl Into<RoutePath>,
        handler: CallHandler,
    ) -> Result<(), RegistryError> {
        self.bind_path(path.into(), handler, true).await
    }

    async fn bind_path(
        &self,
        path: RoutePath,
        handler: CallHandler,
        replace: bool,
    ) -> Result<(), RegistryError> {
        self.ask("register", self.inner.config.ask_timeout(), |reply| {
            RegistrarCommand::Register {
                entries: vec![(path, handler)],
                replace,
                reply,
            }
        })
        .await?
    }

    /// Remove this node's routes of `interface` under `qualifier`, returning the removed paths
    pub async fn unregister<T>(
        &self,
        qualifier: &str,
        interface: &Arc<Interface<T>>,
    ) -> Result<Vec<RoutePath>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        ensure_routable(qualifier, interface)?;
        let paths = interface.routable_paths(qualifier);
        self.ask("unregister", self.inner.config.ask_timeout(), |reply| {
            RegistrarCommand::Unregister { paths, reply }
        })
        .await
    }

    /// Remove this node's handler of a path; false when none was bound
    pub async fn unregister_path(&self, path: impl Into<RoutePath>) -> Result<bool, RegistryError> {
        let paths = vec![path.into()];
        let removed = self
            .ask("unregister", self.inner.config.ask_timeout(), |reply| {
                RegistrarCommand::Unregister { paths, reply }
            })
            .await?;
        Ok(!removed.is_empty())
    }

    /// Known routes of the first routable method of `interface`; empty when nothing is routable
    pub async fn routes<T>(
        &self,
        qualifier: &str,
        interface: &Arc<Interface<T>>,
    ) -> Result<Vec<NodeRef>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        ensure_routable(qualifier, interface)?;
        match interface.routable_methods().next() {
            Some(method) => {
                self.routes_for_path(interface.path_for(qualifier, method.signature()))
                    .await
            }
            None => {
                self.running()?;
                Ok(Vec::new())
            }
        }
    }

    /// Known routes of a path
    pub async fn routes_for_path(
        &self,
        path: impl Into<RoutePath>,
    ) -> Result<Vec<NodeRef>, RegistryError> {
        self.routes_within(path, self.inner.config.ask_timeout())
            .await
    }

    /// Known routes of a path, failing with `RegistrarTimeout` after `timeout`
    pub async fn routes_within(
        &self,
        path: impl Into<RoutePath>,
        timeout: Duration,
    ) -> Result<Vec<NodeRef>, RegistryError> {
        let path = path.into();
        self.ask("routes", timeout, |reply| RegistrarCommand::Routes { path, reply })
            .await
    }

    /// Reusable invocation function for a path
    pub fn route(&self, path: impl Into<RoutePath>, timeout: Duration) -> Route {
        Route {
            registry: self.clone(),
            path: path.into(),
            timeout,
        }
    }

    /// Route of one method of `interface`
    pub fn route_method<T>(
        &self,
        qualifier: &str,
        interface: &Arc<Interface<T>>,
        method: &MethodSignature,
        timeout: Duration,
    ) -> Result<Route, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        ensure_routable(qualifier, interface)?;
        match interface.find(method) {
            Some(found) if found.is_routable() => {
                Ok(self.route(interface.path_for(qualifier, method), timeout))
            }
            _ => Err(RegistryError::UnknownMethod {
                interface: interface.name().to_string(),
                method: method.to_string(),
            }),
        }
    }

    /// Client proxy using the registry's default timeout at call time
    pub fn async_client<T>(
        &self,
        qualifier: &str,
        interface: &Arc<Interface<T>>,
    ) -> Result<ClusterAsync<T>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        ensure_routable(qualifier, interface)?;
        Ok(ClusterAsync::new(
            self.clone(),
            qualifier,
            interface.clone(),
            None,
        ))
    }

    /// Client proxy with a fixed timeout
    pub fn async_client_with_timeout<T>(
        &self,
        qualifier: &str,
        interface: &Arc<Interface<T>>,
        timeout: Duration,
    ) -> Result<ClusterAsync<T>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        ensure_routable(qualifier, interface)?;
        Ok(ClusterAsync::new(
            self.clone(),
            qualifier,
            interface.clone(),
            Some(timeout),
        ))
    }

    /// Subscribe to route events. Events whose delivery already started are not replayed.
    pub fn add_route_listener(&self, listener: Arc<dyn RouteListener>) {
        self.inner.listeners.add(listener);
        self.inner.logger.debug(format!(
            "Route listener added, {} registered",
            self.inner.listeners.len()
        ));
    }

    /// Unsubscribe a listener by identity
    pub fn remove_route_listener(&self, listener: &Arc<dyn RouteListener>) -> bool {
        self.inner.listeners.remove(listener)
    }
}

/// Call handler running `method` of `target` through `invoker`
fn bind(invoker: Arc<dyn Invoker>, target: Arc<dyn Target>, method: MethodSignature) -> CallHandler {
    Arc::new(move |caller: NodeRef, args: Vec<Value>| {
        let invoker = invoker.clone();
        let target = target.clone();
        let method = method.clone();
        async move { invoker.invoke(&caller, target, &method, args).await }.boxed()
    })
}

/// Checks shared by every interface-level operation
fn ensure_routable<T: ?Sized>(qualifier: &str, interface: &Interface<T>) -> Result<(), RegistryError> {
    interface.ensure_interface()?;
    RoutePath::check_qualifier(qualifier)
}

/// Invocation function bound to a path and a timeout
#[derive(Clone)]
pub struct Route {
    registry: Registry,
    path: RoutePath,
    timeout: Duration,
}

impl Route {
    pub fn path(&self) -> &RoutePath {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a fresh request; the returned future observes its outcome
    pub fn call(&self, args: Vec<Value>) -> Result<ResponseFuture, RegistryError> {
        let running = self.registry.running()?;
        let request_id = Uuid::new_v4();
        let deadline = deadline_after(self.timeout);
        let (reply, response) = oneshot::channel();
        running
            .commands
            .send(RegistrarCommand::Invoke {
                request_id,
                path: self.path.clone(),
                args,
                timeout_ms: whole_millis(self.timeout),
                deadline,
                reply,
            })
            .map_err(|_| RegistryError::RegistryClosed)?;
        Ok(ResponseFuture::waiting(
            request_id,
            self.path.clone(),
            self.timeout,
            deadline,
            response,
            running.commands,
        ))
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish()
    }
}
