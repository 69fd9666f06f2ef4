// Registrar commands
//
// Everything the registry facade and response futures ask of the registrar. Each variant
// carries its own reply channel where an answer is expected.

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use super::{CallHandler, Response};
use crate::error::RegistryError;
use crate::network::NodeRef;
use crate::routing::RoutePath;

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum RegistrarCommand {
    /// Bind handlers to paths. All-or-nothing: any conflict rejects the whole batch
    /// unless `replace` is set.
    Register {
        entries: Vec<(RoutePath, CallHandler)>,
        replace: bool,
        reply: Reply<Result<(), RegistryError>>,
    },
    /// Remove local handlers; replies with the paths that were bound
    Unregister {
        paths: Vec<RoutePath>,
        reply: Reply<Vec<RoutePath>>,
    },
    /// Known hosting nodes of a path, sorted
    Routes {
        path: RoutePath,
        reply: Reply<Vec<NodeRef>>,
    },
    /// Route one invocation
    Invoke {
        request_id: Uuid,
        path: RoutePath,
        args: Vec<Value>,
        timeout_ms: u64,
        deadline: Instant,
        reply: Reply<Result<Response, RegistryError>>,
    },
    /// The caller gave up on a request
    Cancel { request_id: Uuid },
    /// A locally executed invocation finished
    Complete {
        request_id: Uuid,
        result: Result<Value, RegistryError>,
    },
    /// Withdraw every local route and stop
    Shutdown { reply: Reply<()> },
}
