// Invocation Module
//
// INTENTION: Everything between a caller and a registered implementation: the invoker that
// runs targets, the registrar actor that owns the routing table, the registry facade, client
// proxies, response futures and route listener dispatch.

pub mod invoker;
pub mod listener;
pub mod proxy;
pub mod registry;
pub mod response;

pub(crate) mod events;
pub(crate) mod pending;
pub(crate) mod registrar;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::error::InvocationError;
use crate::network::NodeRef;
use crate::routing::RoutePath;

pub use invoker::{DefaultInvoker, Invoker, ServiceTarget, Target};
pub use listener::{RouteEvent, RouteListener};
pub use proxy::ClusterAsync;
pub use registry::{Registry, Route};
pub use response::ResponseFuture;

/// Low-level call handler bound to a route path: (caller, arguments) -> result
pub type CallHandler =
    Arc<dyn Fn(NodeRef, Vec<Value>) -> BoxFuture<'static, Result<Value, InvocationError>> + Send + Sync>;

/// Positional invocation arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode the argument at `index`
    pub fn get<D: DeserializeOwned>(&self, index: usize) -> Result<D, InvocationError> {
        let raw = self.0.get(index).ok_or_else(|| {
            InvocationError::ArgumentMismatch(format!(
                "missing argument {index} of {}",
                self.0.len()
            ))
        })?;
        serde_json::from_value(raw.clone()).map_err(|e| {
            InvocationError::ArgumentMismatch(format!("argument {index}: {e}"))
        })
    }

    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Successful outcome of a routed invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub path: RoutePath,
    pub value: Value,
    /// Node that served the call, `None` for proxy-local methods
    pub node: Option<NodeRef>,
}

impl Response {
    /// Decode the returned value
    pub fn decode<D: DeserializeOwned>(&self) -> Result<D, crate::error::RegistryError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            crate::error::RegistryError::UnexpectedResult {
                path: self.path.to_string(),
                reason: e.to_string(),
            }
        })
    }
}
