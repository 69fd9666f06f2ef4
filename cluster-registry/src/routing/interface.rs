// Interface capability tables
//
// INTENTION: Replace runtime reflection over interface methods with a table declared once at
// startup. An `Interface<T>` lists every method signature of a trait object type `T` together
// with either a routed handler (dispatching to an implementation) or a local-only handler that
// proxies execute in place.
//
// Routing exclusion: `hashCode()`, `equals(x)`, `toString()` and local-only methods are never
// routable. An interface whose methods are all excluded is legal and yields no routes.
//
// Names end up inside route paths, so the interface name, method names and parameter types
// must be non-empty and free of the path delimiters `@ : ( ) ,`.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use super::path::{check_segment, RoutePath};
use crate::error::RegistryError;
use crate::invocation::Args;

/// Future returned by a method handler
pub type MethodFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Routed method handler bound to an implementation of `T` at registration time
pub type MethodHandler<T> = Arc<dyn Fn(Arc<T>, Args) -> MethodFuture + Send + Sync>;

/// Handler for local-only methods, executed by the proxy itself
pub type LocalHandler = Arc<dyn Fn(&Args) -> anyhow::Result<Value> + Send + Sync>;

/// Name and ordered parameter type names of a method
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodSignature {
    name: String,
    params: Vec<String>,
}

impl MethodSignature {
    pub fn new<N, I, S>(name: N, params: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// `hashCode()`, `equals(x)` and `toString()`: name plus exact parameter count
    pub fn is_object_method(&self) -> bool {
        matches!(
            (self.name.as_str(), self.params.len()),
            ("hashCode", 0) | ("equals", 1) | ("toString", 0)
        )
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(","))
    }
}

/// Whether a declared type is an interface (routable) or a concrete type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Interface,
    Concrete,
}

pub(crate) enum MethodKind<T: ?Sized> {
    Routed(MethodHandler<T>),
    Local(LocalHandler),
}

/// A declared method of an interface
pub struct Method<T: ?Sized> {
    signature: MethodSignature,
    pub(crate) kind: MethodKind<T>,
}

impl<T: ?Sized> Method<T> {
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, MethodKind::Local(_))
    }

    /// Routable unless it is one of the object methods or marked local-only
    pub fn is_routable(&self) -> bool {
        !self.is_local() && !self.signature.is_object_method()
    }

    pub(crate) fn local_handler(&self) -> Option<&LocalHandler> {
        match &self.kind {
            MethodKind::Local(handler) => Some(handler),
            MethodKind::Routed(_) => None,
        }
    }
}

/// Capability table of a trait object type `T`
pub struct Interface<T: ?Sized> {
    name: String,
    kind: TypeKind,
    methods: Vec<Method<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Interface<T> {
    /// Start declaring an interface with its fully qualified name
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder<T> {
        InterfaceBuilder {
            name: name.into(),
            kind: TypeKind::Interface,
            methods: Vec::new(),
        }
    }

    /// Declare a concrete type. Such tables are rejected by registration and proxies.
    pub fn concrete(name: impl Into<String>) -> InterfaceBuilder<T> {
        InterfaceBuilder {
            name: name.into(),
            kind: TypeKind::Concrete,
            methods: Vec::new(),
        }
    }
}

impl<T: ?Sized> Interface<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Fail with `InvalidInterface` unless this table declares an interface, and with
    /// `InvalidName` when a name could not be embedded in a route path
    pub fn ensure_interface(&self) -> Result<(), RegistryError> {
        if !self.is_interface() {
            return Err(RegistryError::InvalidInterface(self.name.clone()));
        }
        check_segment("interface name", &self.name)?;
        for method in &self.methods {
            check_segment("method name", method.signature.name())?;
            for param in method.signature.params() {
                check_segment("parameter type", param)?;
            }
        }
        Ok(())
    }

    pub fn methods(&self) -> &[Method<T>] {
        &self.methods
    }

    pub fn routable_methods(&self) -> impl Iterator<Item = &Method<T>> {
        self.methods.iter().filter(|m| m.is_routable())
    }

    pub fn find(&self, signature: &MethodSignature) -> Option<&Method<T>> {
        self.methods.iter().find(|m| &m.signature == signature)
    }

    /// Resolve a method by name and argument count. The first declared overload wins.
    pub fn find_by_name(&self, name: &str, arity: usize) -> Option<&Method<T>> {
        self.methods
            .iter()
            .find(|m| m.signature.name == name && m.signature.arity() == arity)
    }

    /// Route path of one of this interface's methods
    pub fn path_for(&self, qualifier: &str, signature: &MethodSignature) -> RoutePath {
        RoutePath::derive(qualifier, &self.name, signature)
    }

    /// Route paths of every routable method, in declaration order
    pub fn routable_paths(&self, qualifier: &str) -> Vec<RoutePath> {
        self.routable_methods()
            .map(|m| self.path_for(qualifier, &m.signature))
            .collect()
    }
}

impl<T: ?Sized> fmt::Debug for Interface<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field(
                "methods",
                &self
                    .methods
                    .iter()
                    .map(|m| m.signature.to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Interface`] tables
pub struct InterfaceBuilder<T: ?Sized> {
    name: String,
    kind: TypeKind,
    methods: Vec<Method<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> InterfaceBuilder<T> {
    /// Declare a routed method dispatching to the implementation
    pub fn method<N, P, S, F, Fut>(mut self, name: N, params: P, handler: F) -> Self
    where
        N: Into<String>,
        P: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: MethodHandler<T> =
            Arc::new(move |target, args| Box::pin(handler(target, args)) as MethodFuture);
        self.methods.push(Method {
            signature: MethodSignature::new(name, params),
            kind: MethodKind::Routed(handler),
        });
        self
    }

    /// Declare a local-only method; it is never routed
    pub fn local_method<N, P, S, F>(mut self, name: N, params: P, handler: F) -> Self
    where
        N: Into<String>,
        P: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.methods.push(Method {
            signature: MethodSignature::new(name, params),
            kind: MethodKind::Local(Arc::new(handler)),
        });
        self
    }

    pub fn build(self) -> Arc<Interface<T>> {
        Arc::new(Interface {
            name: self.name,
            kind: self.kind,
            methods: self.methods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    trait Greeter: Send + Sync {
        fn greet(&self, name: &str) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self, name: &str) -> String {
            format!("hello {name}")
        }
    }

    async fn greet(greeter: Arc<dyn Greeter>, args: Args) -> anyhow::Result<Value> {
        let name: String = args.get(0)?;
        Ok(json!(greeter.greet(&name)))
    }

    async fn constant(_greeter: Arc<dyn Greeter>, _args: Args) -> anyhow::Result<Value> {
        Ok(json!("constant"))
    }

    fn no_params() -> Vec<String> {
        Vec::new()
    }

    fn greeter_interface() -> Arc<Interface<dyn Greeter>> {
        Interface::<dyn Greeter>::builder("com.example.Greeter")
            .method("greet", ["java.lang.String"], greet)
            .method("hashCode", no_params(), constant)
            .method("equals", ["java.lang.Object"], constant)
            .method("toString", no_params(), constant)
            .local_method("language", no_params(), |_args: &Args| Ok(json!("en")))
            .build()
    }

    #[test]
    fn test_object_methods_match_name_and_arity() {
        assert!(MethodSignature::new("hashCode", no_params()).is_object_method());
        assert!(MethodSignature::new("equals", ["java.lang.Object"]).is_object_method());
        assert!(MethodSignature::new("toString", no_params()).is_object_method());

        // same names with other arities stay routable
        assert!(!MethodSignature::new("hashCode", ["int"]).is_object_method());
        assert!(!MethodSignature::new("equals", ["a", "b"]).is_object_method());
        assert!(!MethodSignature::new("toString", ["int"]).is_object_method());
        assert!(!MethodSignature::new("add", ["int", "int"]).is_object_method());
    }

    #[test]
    fn test_routable_methods_skip_object_and_local_methods() {
        let interface = greeter_interface();
        let routable: Vec<String> = interface
            .routable_methods()
            .map(|m| m.signature().to_string())
            .collect();
        assert_eq!(routable, vec!["greet(java.lang.String)".to_string()]);
        assert_eq!(
            interface.routable_paths("en"),
            vec![RoutePath::new("en@com.example.Greeter::greet(java.lang.String)")]
        );
    }

    #[test]
    fn test_interface_with_only_excluded_methods_has_no_routes() {
        let interface = Interface::<dyn Greeter>::builder("com.example.Plain")
            .method("toString", no_params(), constant)
            .local_method("describe", no_params(), |_args: &Args| Ok(Value::Null))
            .build();
        assert!(interface.routable_paths("q").is_empty());
    }

    #[test]
    fn test_concrete_types_are_rejected() {
        let concrete = Interface::<dyn Greeter>::concrete("com.example.EnglishGreeter").build();
        assert_eq!(
            concrete.ensure_interface(),
            Err(RegistryError::InvalidInterface(
                "com.example.EnglishGreeter".to_string()
            ))
        );
        assert!(greeter_interface().ensure_interface().is_ok());
    }

    #[test]
    fn test_names_with_path_delimiters_are_rejected() {
        let nested = Interface::<dyn Greeter>::builder("b@com.example.Greeter")
            .method("greet", ["java.lang.String"], greet)
            .build();
        assert_eq!(
            nested.ensure_interface(),
            Err(RegistryError::InvalidName {
                kind: "interface name".to_string(),
                name: "b@com.example.Greeter".to_string(),
                reason: "must not contain any of @ : ( ) ,".to_string(),
            })
        );

        let scoped = Interface::<dyn Greeter>::builder("com::example::Greeter").build();
        assert!(matches!(
            scoped.ensure_interface(),
            Err(RegistryError::InvalidName { .. })
        ));

        let method = Interface::<dyn Greeter>::builder("com.example.Greeter")
            .method("greet(x)", no_params(), constant)
            .build();
        assert!(matches!(
            method.ensure_interface(),
            Err(RegistryError::InvalidName { kind, .. }) if kind == "method name"
        ));

        let param = Interface::<dyn Greeter>::builder("com.example.Greeter")
            .method("greet", ["Map<String,String>"], constant)
            .build();
        assert!(matches!(
            param.ensure_interface(),
            Err(RegistryError::InvalidName { kind, .. }) if kind == "parameter type"
        ));

        let unnamed = Interface::<dyn Greeter>::builder("").build();
        assert!(matches!(
            unnamed.ensure_interface(),
            Err(RegistryError::InvalidName { reason, .. }) if reason == "must not be empty"
        ));
    }

    #[test]
    fn test_find_by_name_uses_arity() {
        let interface = greeter_interface();
        assert!(interface.find_by_name("greet", 1).is_some());
        assert!(interface.find_by_name("greet", 0).is_none());
        assert!(interface.find_by_name("language", 0).unwrap().is_local());
    }

    #[tokio::test]
    async fn test_routed_handler_dispatches_to_implementation() {
        let interface = greeter_interface();
        let method = interface.find_by_name("greet", 1).unwrap();
        let MethodKind::Routed(handler) = &method.kind else {
            panic!("greet should be routed");
        };
        let target: Arc<dyn Greeter> = Arc::new(English);
        let value = handler(target, Args::new(vec![json!("bob")])).await.unwrap();
        assert_eq!(value, json!("hello bob"));
    }
}
