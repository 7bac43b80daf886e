//! # Completion Notifier
//!
//! The write side publishes each request's outcome into the registry, which
//! wakes that request's single waiter. The read side is the [`Ticket`] handed
//! to the originator at submission.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::error;
use crate::communication::{Request, RequestId};
use crate::error::BatchError;
use crate::registry::{Registry, SlotStatus};

pub(crate) struct Notifier<O> {
    registry: Arc<Registry<O>>,
}

impl<O> Clone for Notifier<O> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<O> Notifier<O> {
    pub fn new(registry: Arc<Registry<O>>) -> Self {
        Self { registry }
    }

    /// Delivers `outcomes[i]` to `requests[i]`.
    pub fn publish(&self, requests: &[Request], outcomes: Vec<Result<O, BatchError>>) {
        assert_eq!(
            requests.len(),
            outcomes.len(),
            "every request of a batch needs exactly one outcome"
        );
        for (request, outcome) in requests.iter().zip(outcomes) {
            self.deliver(request.id(), outcome);
        }
    }

    /// Delivers the same error to every request.
    pub fn fail_all(&self, requests: &[Request], err: BatchError) {
        for request in requests {
            self.deliver(request.id(), Err(err.clone()));
        }
    }

    fn deliver(&self, id: RequestId, outcome: Result<O, BatchError>) {
        if let Err(violation) = self.registry.complete(id, outcome) {
            error!(request_id = %id, %violation, "result registry invariant broken");
            panic!("{violation}");
        }
    }
}

/// # Ticket
///
/// The originator's claim on one submitted request.
///
/// Await it (or call [`wait`](Ticket::wait)) to block until the result exists,
/// bounded by the configured wait timeout. Dropping a ticket before its result
/// is taken abandons the request: the batch still runs, but its result is
/// thrown away instead of being kept for nobody.
///
/// ```ignore
/// let ticket = batcher.submit("Tell me a story about a dragon.", params)?;
/// let story = ticket.await?;
/// ```
pub struct Ticket<O> {
    id: RequestId,
    registry: Arc<Registry<O>>,
    timeout: Duration,
    armed: bool,
}

impl<O> Ticket<O>
where O: Send + Sync + 'static
{
    pub(crate) fn new(id: RequestId, registry: Arc<Registry<O>>, timeout: Duration) -> Self {
        Self {
            id,
            registry,
            timeout,
            armed: true,
        }
    }

    /// Correlation id of the submitted request.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Non-destructive check on the request's result.
    pub fn status(&self) -> SlotStatus {
        self.registry.poll(self.id)
    }

    /// Waits up to the configured wait timeout.
    pub async fn wait(self) -> Result<O, BatchError> {
        let timeout = self.timeout;
        self.wait_for(timeout).await
    }

    /// Waits up to `timeout` instead of the configured wait timeout.
    ///
    /// # Returns
    ///
    /// The request's own outcome, or [`BatchError::Timeout`] once `timeout`
    /// elapses. A timed-out request is abandoned and its late result dropped.
    pub async fn wait_for(mut self, timeout: Duration) -> Result<O, BatchError> {
        self.armed = false;
        let registry = self.registry.clone();
        registry.wait(self.id, timeout).await
    }

    /// Gives up the ticket but keeps the request alive.
    ///
    /// The result can still be fetched by id through the batcher until it is
    /// reaped.
    pub fn detach(mut self) -> RequestId {
        self.armed = false;
        self.id
    }
}

impl<O> Drop for Ticket<O> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abandon(self.id);
        }
    }
}

impl<O> IntoFuture for Ticket<O>
where O: Send + Sync + 'static
{
    type Output = Result<O, BatchError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}
