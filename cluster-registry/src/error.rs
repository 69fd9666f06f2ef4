// Error types for the invocation registry
//
// Local programming errors (invalid interface, closed registry) surface synchronously at the
// call site. Remote and timeout failures are delivered through the caller's future.
// Both enums are serializable so a callee's failure kind survives the trip across the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure raised while invoking a registered target
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum InvocationError {
    /// The target implementation raised an error or panicked
    #[error("target failed: {0}")]
    TargetFailed(String),

    /// The method could not be located on the target implementation
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// The argument array does not match the method signature
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),
}

/// Errors reported by the registry facade and through invocation futures
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RegistryError {
    #[error("{0} is not an interface")]
    InvalidInterface(String),

    #[error("invalid {kind} '{name}': {reason}")]
    InvalidName {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("interface {interface} has no method {method}")]
    UnknownMethod { interface: String, method: String },

    #[error("no route found for {0}")]
    RouteNotFound(String),

    #[error("invocation of {path} timed out after {timeout_ms}ms")]
    InvocationTimeout { path: String, timeout_ms: u64 },

    #[error("registrar did not answer {operation} within {timeout_ms}ms")]
    RegistrarTimeout { operation: String, timeout_ms: u64 },

    #[error("invocation of {path} failed: {source}")]
    RemoteInvocationFailure {
        path: String,
        #[source]
        source: InvocationError,
    },

    #[error("a handler is already bound to {0}")]
    AlreadyBound(String),

    #[error("registry already started")]
    AlreadyStarted,

    #[error("registry has not been started")]
    NotStarted,

    #[error("registry is closed")]
    RegistryClosed,

    #[error("unexpected result from {path}: {reason}")]
    UnexpectedResult { path: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("host task failed: {0}")]
    HostTask(String),
}

impl RegistryError {
    /// True for failures produced because no reply arrived in time
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RegistryError::InvocationTimeout { .. } | RegistryError::RegistrarTimeout { .. }
        )
    }

    /// The callee's own failure, when the target raised one
    pub fn invocation_error(&self) -> Option<&InvocationError> {
        match self {
            RegistryError::RemoteInvocationFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}
