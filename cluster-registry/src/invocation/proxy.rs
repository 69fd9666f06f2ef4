// Client proxies
//
// INTENTION: Give callers an object that stands for an interface hosted somewhere in the
// cluster. Each method call is resolved against the interface table, turned into a route path
// and sent through the registry, returning a `ResponseFuture`. Local-only methods and the
// object methods (`hashCode`, `equals`, `toString`) never leave the proxy: they are answered
// in place, the object methods from the proxy's own identity.
//
// Typed clients implement their trait on top of `ClusterAsync::invoke`.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use super::invoker::DefaultInvoker;
use super::registry::Registry;
use super::response::ResponseFuture;
use super::{Args, Response};
use crate::error::RegistryError;
use crate::routing::{Interface, Method, MethodSignature};

/// Asynchronous client for an interface registered under a qualifier
pub struct ClusterAsync<T: ?Sized> {
    registry: Registry,
    qualifier: String,
    interface: Arc<Interface<T>>,
    timeout: Option<Duration>,
}

impl<T: ?Sized + Send + Sync + 'static> ClusterAsync<T> {
    pub(crate) fn new(
        registry: Registry,
        qualifier: &str,
        interface: Arc<Interface<T>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            qualifier: qualifier.trim().to_string(),
            interface,
            timeout,
        }
    }

    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    pub fn interface(&self) -> &Arc<Interface<T>> {
        &self.interface
    }

    /// Effective timeout: the proxy's own, else the registry default at call time
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.registry.timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Call a method by name; the overload is picked by argument count
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<ResponseFuture, RegistryError> {
        match self.interface.find_by_name(method, args.len()) {
            Some(found) => self.dispatch(found, args),
            None => {
                let signature = object_signature(method, args.len()).ok_or_else(|| {
                    RegistryError::UnknownMethod {
                        interface: self.interface.name().to_string(),
                        method: format!("{method}/{}", args.len()),
                    }
                })?;
                Ok(self.answer_locally(&signature, args))
            }
        }
    }

    /// Call a method by its exact signature
    pub fn call_signature(
        &self,
        signature: &MethodSignature,
        args: Vec<Value>,
    ) -> Result<ResponseFuture, RegistryError> {
        match self.interface.find(signature) {
            Some(found) => self.dispatch(found, args),
            None if signature.is_object_method() => Ok(self.answer_locally(signature, args)),
            None => Err(RegistryError::UnknownMethod {
                interface: self.interface.name().to_string(),
                method: signature.to_string(),
            }),
        }
    }

    /// Call a method and decode its result
    pub async fn invoke<R: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<R, RegistryError> {
        let response = self.call(method, args)?.await?;
        response.decode()
    }

    fn dispatch(&self, method: &Method<T>, args: Vec<Value>) -> Result<ResponseFuture, RegistryError> {
        let signature = method.signature();
        if method.is_routable() {
            let path = self.interface.path_for(&self.qualifier, signature);
            return self.registry.route(path, self.timeout()).call(args);
        }
        Ok(self.answer_locally(signature, args))
    }

    fn answer_locally(&self, signature: &MethodSignature, args: Vec<Value>) -> ResponseFuture {
        let path = self.interface.path_for(&self.qualifier, signature);
        let handler = self
            .interface
            .find(signature)
            .and_then(|m| m.local_handler())
            .cloned();
        let outcome = match handler {
            Some(handler) => handler(&Args::new(args)).map_err(|e| {
                RegistryError::RemoteInvocationFailure {
                    path: path.to_string(),
                    source: DefaultInvoker::classify(e),
                }
            }),
            None => Ok(self.object_method(signature, &args)),
        };
        let response = outcome.map(|value| Response {
            path: path.clone(),
            value,
            node: None,
        });
        ResponseFuture::ready(path, response)
    }

    fn object_method(&self, signature: &MethodSignature, args: &[Value]) -> Value {
        match signature.name() {
            "hashCode" => {
                let mut hasher = DefaultHasher::new();
                self.hash(&mut hasher);
                json!(hasher.finish() as i64)
            }
            "equals" => json!(args.first() == Some(&json!(self.to_string()))),
            _ => json!(self.to_string()),
        }
    }
}

/// Signature used for object methods an interface does not declare
fn object_signature(name: &str, arity: usize) -> Option<MethodSignature> {
    let params: Vec<&str> = match (name, arity) {
        ("hashCode", 0) | ("toString", 0) => Vec::new(),
        ("equals", 1) => vec!["java.lang.Object"],
        _ => return None,
    };
    Some(MethodSignature::new(name, params))
}

impl<T: ?Sized> Clone for ClusterAsync<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            qualifier: self.qualifier.clone(),
            interface: self.interface.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T: ?Sized> fmt::Display for ClusterAsync<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qualifier.is_empty() {
            write!(f, "ClusterAsync[{}]", self.interface.name())
        } else {
            write!(f, "ClusterAsync[{}@{}]", self.qualifier, self.interface.name())
        }
    }
}

impl<T: ?Sized> fmt::Debug for ClusterAsync<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterAsync")
            .field("qualifier", &self.qualifier)
            .field("interface", &self.interface.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Proxies are equal when they stand for the same qualified interface
impl<T: ?Sized> PartialEq for ClusterAsync<T> {
    fn eq(&self, other: &Self) -> bool {
        self.qualifier == other.qualifier && self.interface.name() == other.interface.name()
    }
}

impl<T: ?Sized> Eq for ClusterAsync<T> {}

impl<T: ?Sized> Hash for ClusterAsync<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.qualifier.hash(state);
        self.interface.name().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;

    trait Echo: Send + Sync {}

    async fn unused(_echo: Arc<dyn Echo>, _args: Args) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    fn interface() -> Arc<Interface<dyn Echo>> {
        Interface::<dyn Echo>::builder("com.example.Echo")
            .method("echo", ["java.lang.String"], unused)
            .method("toString", Vec::<String>::new(), unused)
            .local_method("version", Vec::<String>::new(), |_args: &Args| Ok(json!(3)))
            .local_method("fail", Vec::<String>::new(), |_args: &Args| {
                Err(anyhow::anyhow!("not here"))
            })
            .build()
    }

    fn proxy() -> ClusterAsync<dyn Echo> {
        let registry = Registry::new(RegistryConfig::new("proxy-test"));
        registry.async_client(" echo ", &interface()).unwrap()
    }

    #[tokio::test]
    async fn test_local_methods_run_in_place() {
        let proxy = proxy();
        assert_eq!(proxy.invoke::<i32>("version", vec![]).await.unwrap(), 3);

        let failed = proxy.call("fail", vec![]).unwrap().await;
        assert!(matches!(
            failed,
            Err(RegistryError::RemoteInvocationFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_object_methods_use_proxy_identity() {
        let proxy = proxy();
        let text: String = proxy.invoke("toString", vec![]).await.unwrap();
        assert_eq!(text, "ClusterAsync[echo@com.example.Echo]");

        let same: bool = proxy.invoke("equals", vec![json!(text)]).await.unwrap();
        assert!(same);
        let other: bool = proxy.invoke("equals", vec![json!("x")]).await.unwrap();
        assert!(!other);

        let first: i64 = proxy.invoke("hashCode", vec![]).await.unwrap();
        let second: i64 = proxy.clone().invoke("hashCode", vec![]).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_routed_call_needs_started_registry() {
        let proxy = proxy();
        assert_eq!(
            proxy.call("echo", vec![json!("hi")]).unwrap_err(),
            RegistryError::NotStarted
        );
        assert!(matches!(
            proxy.call("missing", vec![]),
            Err(RegistryError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_proxy_timeout_falls_back_to_registry_default() {
        let proxy = proxy();
        assert_eq!(proxy.timeout(), Duration::from_millis(5_000));
        let fixed = proxy.with_timeout(Duration::from_millis(50));
        assert_eq!(fixed.timeout(), Duration::from_millis(50));
    }
}
