use async_trait::async_trait;
use crate::communication::Request;
use crate::error::BackendError;
use crate::params::GenerationParams;

/// Result for one item of a batch.
pub type ItemOutcome<O> = Result<O, BackendError>;

/// The batch-capable compute backend the scheduler drives.
///
/// `invoke_batch` receives the requests of one batch in order and returns one
/// outcome per request, in the same order. Returning `Err` means the call
/// failed as a whole; every request of the batch then receives that error.
///
/// Most backends are written against one of the narrower traits below and
/// wrapped in the matching adapter: [`Model`] with [`PerItem`](super::PerItem),
/// [`BatchModel`] with [`Atomic`](super::Atomic), or
/// [`BlockingModel`] with [`BlockingBackend`](super::BlockingBackend).
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    async fn invoke_batch(
        &self,
        batch: &[Request],
    ) -> Result<Vec<ItemOutcome<Self::Output>>, BackendError>;
}

/// A backend invoked one prompt at a time.
///
/// A failing prompt only fails its own request.
#[async_trait]
pub trait Model: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    async fn invoke(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Self::Output, BackendError>;
}

/// A backend whose batch call is atomic: all outputs, or one error for all.
#[async_trait]
pub trait BatchModel: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    /// Must return exactly one output per request, positionally aligned.
    async fn invoke_batch(&self, batch: &[Request]) -> Result<Vec<Self::Output>, BackendError>;
}

/// A synchronous, possibly long-running backend, e.g. a CPU-bound model call.
///
/// Invocations run on tokio's blocking pool, never on the scheduler.
pub trait BlockingModel: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn invoke(&self, prompt: &str, params: &GenerationParams) -> Result<Self::Output, BackendError>;
}
