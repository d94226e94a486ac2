//! The handler execution bridge.
//!
//! Handlers never run on the reactor. [`HandlerExecutor::submit`] spawns each
//! [`HandlerTask`] on the worker runtime, bounded by a semaphore: when every
//! permit is taken the submission is refused instead of queued, and the
//! connection gets a `503`.
//!
//! A task reports exactly one outcome back to its connection service. It
//! races the handler against the exchange's cancellation token, and a
//! cancelled task reports nothing.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use http::Request;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::handler::{ExchangeContext, HandlerError};
use crate::protocol::body::ReqBody;
use crate::service::ConnectionService;

/// Why a handler task was not accepted.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("handler executor saturated, {limit} handlers in flight")]
    Saturated { limit: usize },
}

/// Runs handler tasks on the worker runtime, at most `limit` at a time.
///
/// Submission never waits: a full executor rejects the task and the exchange
/// is answered with `503 Service Unavailable`.
#[derive(Debug)]
pub struct HandlerExecutor {
    runtime: Handle,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl HandlerExecutor {
    /// Spawns onto `runtime`. A `max_in_flight` of zero is treated as one.
    pub fn new(runtime: Handle, max_in_flight: usize) -> Self {
        let limit = max_in_flight.max(1);
        Self { runtime, permits: Arc::new(Semaphore::new(limit)), limit }
    }

    /// Handler tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Spawns `task` if a slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Saturated`] when `limit` tasks are already running.
    pub fn submit(&self, task: HandlerTask) -> Result<(), SubmitError> {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Err(SubmitError::Saturated { limit: self.limit });
        };

        self.runtime.spawn(async move {
            task.run().await;
            drop(permit);
        });
        Ok(())
    }
}

/// One request on its way through a handler.
pub struct HandlerTask {
    service: Arc<ConnectionService>,
    request: Request<ReqBody>,
    ctx: ExchangeContext,
}

impl std::fmt::Debug for HandlerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTask")
            .field("conn", &self.ctx.connection_id())
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .finish()
    }
}

impl HandlerTask {
    pub(crate) fn new(service: Arc<ConnectionService>, request: Request<ReqBody>, ctx: ExchangeContext) -> Self {
        Self { service, request, ctx }
    }

    async fn run(self) {
        let HandlerTask { service, request, ctx } = self;
        let context = Arc::clone(service.context());
        let handler = context.registry().resolve(request.uri().path());
        let cancellation = ctx.cancellation().clone();

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => None,
            result = AssertUnwindSafe(handler.handle(request, &ctx)).catch_unwind() => Some(result),
        };

        match outcome {
            None => debug!(conn = %ctx.connection_id(), "handler cancelled"),
            Some(Ok(result)) => service.handler_completed(result),
            Some(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(conn = %ctx.connection_id(), panic = message, "handler panicked");
                service.handler_completed(Err(HandlerError::internal(format!("handler panicked: {message}"))));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown"
    }
}
