use async_trait::async_trait;
use crate::communication::Request;
use crate::error::BackendError;
use super::{Backend, BatchModel, ItemOutcome};

/// Adapts a [`BatchModel`] whose single call covers the whole batch.
///
/// If that call fails, every request of the batch gets its error.
pub struct Atomic<M> {
    model: M,
}

impl<M> Atomic<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

#[async_trait]
impl<M> Backend for Atomic<M>
where M: BatchModel
{
    type Output = M::Output;

    async fn invoke_batch(
        &self,
        batch: &[Request],
    ) -> Result<Vec<ItemOutcome<Self::Output>>, BackendError> {
        let outputs = self.model.invoke_batch(batch).await?;
        Ok(outputs.into_iter().map(Ok).collect())
    }
}
