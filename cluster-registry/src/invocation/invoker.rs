// Invoker
//
// INTENTION: Run a registered implementation for one method call and classify every outcome.
// The registry never calls a target directly; it goes through an `Invoker`, so callers can
// swap in their own (tracing, auth, sandboxing) while the default keeps failures typed:
// "target failed", "target not found" and "argument mismatch" stay distinguishable, and a
// panicking target is reported instead of tearing down the registrar.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::Args;
use crate::error::InvocationError;
use crate::network::NodeRef;
use crate::routing::interface::MethodKind;
use crate::routing::{Interface, MethodFuture, MethodSignature};

/// A registered implementation whose methods can be called by signature
pub trait Target: Send + Sync {
    /// Name of the implemented interface, for diagnostics
    fn type_name(&self) -> &str;

    /// Start a call of `method`, or `None` when the target has no routed method by that signature
    fn call(&self, method: &MethodSignature, args: Args) -> Option<MethodFuture>;
}

/// An implementation bound to the interface table it was registered with
pub struct ServiceTarget<T: ?Sized> {
    interface: Arc<Interface<T>>,
    implementation: Arc<T>,
}

impl<T: ?Sized + Send + Sync + 'static> ServiceTarget<T> {
    pub fn new(interface: Arc<Interface<T>>, implementation: Arc<T>) -> Self {
        Self {
            interface,
            implementation,
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Target for ServiceTarget<T> {
    fn type_name(&self) -> &str {
        self.interface.name()
    }

    fn call(&self, method: &MethodSignature, args: Args) -> Option<MethodFuture> {
        match &self.interface.find(method)?.kind {
            MethodKind::Routed(handler) => Some(handler(self.implementation.clone(), args)),
            MethodKind::Local(_) => None,
        }
    }
}

/// Performs the call of a target on behalf of a caller
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        caller: &NodeRef,
        target: Arc<dyn Target>,
        method: &MethodSignature,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError>;
}

/// Invoker used when registration does not supply one
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultInvoker;

impl DefaultInvoker {
    /// Keep an `InvocationError` raised by the target, report anything else as `TargetFailed`
    pub(crate) fn classify(error: anyhow::Error) -> InvocationError {
        match error.downcast::<InvocationError>() {
            Ok(typed) => typed,
            Err(other) => InvocationError::TargetFailed(format!("{other:#}")),
        }
    }

    fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
        if let Some(message) = payload.downcast_ref::<&str>() {
            format!("panicked: {message}")
        } else if let Some(message) = payload.downcast_ref::<String>() {
            format!("panicked: {message}")
        } else {
            "panicked".to_string()
        }
    }
}

#[async_trait]
impl Invoker for DefaultInvoker {
    async fn invoke(
        &self,
        _caller: &NodeRef,
        target: Arc<dyn Target>,
        method: &MethodSignature,
        args: Vec<Value>,
    ) -> Result<Value, InvocationError> {
        if args.len() != method.arity() {
            return Err(InvocationError::ArgumentMismatch(format!(
                "{method} expects {} arguments, got {}",
                method.arity(),
                args.len()
            )));
        }

        let started =
            std::panic::catch_unwind(AssertUnwindSafe(|| target.call(method, Args::new(args))))
                .map_err(|payload| InvocationError::TargetFailed(Self::panic_message(payload)))?;
        let future = started.ok_or_else(|| {
            InvocationError::TargetNotFound(format!("{} has no method {method}", target.type_name()))
        })?;

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(Self::classify(error)),
            Err(payload) => Err(InvocationError::TargetFailed(Self::panic_message(payload))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    trait Counter: Send + Sync {
        fn add(&self, a: i64, b: i64) -> i64;
    }

    struct Adder;

    impl Counter for Adder {
        fn add(&self, a: i64, b: i64) -> i64 {
            a + b
        }
    }

    async fn add(counter: Arc<dyn Counter>, args: Args) -> anyhow::Result<Value> {
        Ok(json!(counter.add(args.get(0)?, args.get(1)?)))
    }

    async fn fail(_counter: Arc<dyn Counter>, _args: Args) -> anyhow::Result<Value> {
        Err(anyhow!("disk on fire").context("while counting"))
    }

    async fn explode(_counter: Arc<dyn Counter>, _args: Args) -> anyhow::Result<Value> {
        panic!("boom")
    }

    fn target() -> Arc<dyn Target> {
        let interface = Interface::<dyn Counter>::builder("com.example.Counter")
            .method("add", ["long", "long"], add)
            .method("fail", Vec::<String>::new(), fail)
            .method("explode", Vec::<String>::new(), explode)
            .local_method("describe", Vec::<String>::new(), |_args: &Args| Ok(json!("adder")))
            .build();
        let implementation: Arc<dyn Counter> = Arc::new(Adder);
        Arc::new(ServiceTarget::new(interface, implementation))
    }

    fn caller() -> NodeRef {
        NodeRef::new("node-a", "registry")
    }

    fn no_params() -> MethodSignature {
        MethodSignature::new("fail", Vec::<String>::new())
    }

    #[tokio::test]
    async fn test_invoke_returns_result() {
        let value = DefaultInvoker
            .invoke(
                &caller(),
                target(),
                &MethodSignature::new("add", ["long", "long"]),
                vec![json!(2), json!(3)],
            )
            .await
            .unwrap();
        assert_eq!(value, json!(5));
    }

    #[tokio::test]
    async fn test_target_failure_keeps_context() {
        let result = DefaultInvoker
            .invoke(&caller(), target(), &no_params(), vec![])
            .await;
        assert_eq!(
            result,
            Err(InvocationError::TargetFailed(
                "while counting: disk on fire".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_missing_and_local_methods_are_not_found() {
        let missing = DefaultInvoker
            .invoke(
                &caller(),
                target(),
                &MethodSignature::new("sub", ["long", "long"]),
                vec![json!(1), json!(1)],
            )
            .await;
        assert!(matches!(missing, Err(InvocationError::TargetNotFound(_))));

        let local = DefaultInvoker
            .invoke(
                &caller(),
                target(),
                &MethodSignature::new("describe", Vec::<String>::new()),
                vec![],
            )
            .await;
        assert!(matches!(local, Err(InvocationError::TargetNotFound(_))));
    }

    #[tokio::test]
    async fn test_argument_mismatch() {
        let add = MethodSignature::new("add", ["long", "long"]);
        let wrong_count = DefaultInvoker
            .invoke(&caller(), target(), &add, vec![json!(1)])
            .await;
        assert!(matches!(wrong_count, Err(InvocationError::ArgumentMismatch(_))));

        let wrong_type = DefaultInvoker
            .invoke(&caller(), target(), &add, vec![json!(1), json!("two")])
            .await;
        assert!(matches!(wrong_type, Err(InvocationError::ArgumentMismatch(_))));
    }

    #[tokio::test]
    async fn test_panicking_target_is_reported() {
        let result = DefaultInvoker
            .invoke(
                &caller(),
                target(),
                &MethodSignature::new("explode", Vec::<String>::new()),
                vec![],
            )
            .await;
        assert_eq!(
            result,
            Err(InvocationError::TargetFailed("panicked: boom".to_string()))
        );
    }
}
