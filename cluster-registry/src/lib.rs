// Public modules
pub mod config;
pub mod error;
pub mod host;
pub mod invocation;
pub mod network;
pub mod routing;

// Re-export the main types from the invocation module
pub use invocation::{
    Args, CallHandler, ClusterAsync, DefaultInvoker, Invoker, Registry, Response,
    ResponseFuture, Route, RouteEvent, RouteListener, ServiceTarget, Target,
};

// Re-export the main types from the routing module
pub use routing::{Interface, InterfaceBuilder, MethodSignature, RoutePath, TypeKind};

// Re-export the main types from the network module
pub use network::{
    ClusterTransport, MemoryCluster, MemoryTransport, NodeRef, TransportEvent,
};

pub use config::RegistryConfig;
pub use error::{InvocationError, RegistryError};
pub use host::ClusterHost;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
