// Response futures
//
// INTENTION: The caller's handle on one routed invocation. The request is already on its way
// when the future is created; awaiting it only observes the outcome. The future carries its
// own deadline timer, so it fails with `InvocationTimeout` at the deadline even if the
// registrar or the network never answers. Timing out or dropping the future cancels the
// request so the registrar releases its pending record.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};
use uuid::Uuid;

use super::events::RegistrarCommand;
use super::Response;
use crate::error::RegistryError;
use crate::routing::RoutePath;

/// Cap applied to deadlines that would overflow the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Whole milliseconds of `duration`, saturating at `u64::MAX`
pub(crate) fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Deadline `timeout` from now, capped at [`FAR_FUTURE`]
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + timeout.min(FAR_FUTURE))
}

enum State {
    Waiting {
        reply: oneshot::Receiver<Result<Response, RegistryError>>,
        deadline: Pin<Box<Sleep>>,
        commands: mpsc::UnboundedSender<RegistrarCommand>,
    },
    Ready(Option<Result<Response, RegistryError>>),
    Finished,
}

/// Future resolving to the outcome of a routed invocation
pub struct ResponseFuture {
    request_id: Uuid,
    path: RoutePath,
    timeout: Duration,
    state: State,
}

impl ResponseFuture {
    pub(crate) fn waiting(
        request_id: Uuid,
        path: RoutePath,
        timeout: Duration,
        deadline: Instant,
        reply: oneshot::Receiver<Result<Response, RegistryError>>,
        commands: mpsc::UnboundedSender<RegistrarCommand>,
    ) -> Self {
        Self {
            request_id,
            path,
            timeout,
            state: State::Waiting {
                reply,
                deadline: Box::pin(tokio::time::sleep_until(deadline)),
                commands,
            },
        }
    }

    /// An already completed future, used for methods proxies execute in place
    pub(crate) fn ready(path: RoutePath, result: Result<Response, RegistryError>) -> Self {
        Self {
            request_id: Uuid::nil(),
            path,
            timeout: Duration::ZERO,
            state: State::Ready(Some(result)),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn path(&self) -> &RoutePath {
        &self.path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn cancel(&self) {
        if let State::Waiting { commands, .. } = &self.state {
            let _ = commands.send(RegistrarCommand::Cancel {
                request_id: self.request_id,
            });
        }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, RegistryError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outcome = match &mut this.state {
            State::Ready(result) => match result.take() {
                Some(result) => result,
                None => Err(RegistryError::UnexpectedResult {
                    path: this.path.to_string(),
                    reason: "response polled after completion".to_string(),
                }),
            },
            State::Finished => Err(RegistryError::UnexpectedResult {
                path: this.path.to_string(),
                reason: "response polled after completion".to_string(),
            }),
            State::Waiting {
                reply, deadline, ..
            } => {
                if let Poll::Ready(received) = Pin::new(reply).poll(cx) {
                    // The registrar drops the sender only when it stops
                    received.unwrap_or(Err(RegistryError::RegistryClosed))
                } else if deadline.as_mut().poll(cx).is_ready() {
                    this.cancel();
                    Err(RegistryError::InvocationTimeout {
                        path: this.path.to_string(),
                        timeout_ms: whole_millis(this.timeout),
                    })
                } else {
                    return Poll::Pending;
                }
            }
        };
        this.state = State::Finished;
        Poll::Ready(outcome)
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("request_id", &self.request_id)
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish()
    }
}
