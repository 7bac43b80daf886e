use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use async_trait::async_trait;
use crate::communication::Request;
use crate::error::BackendError;
use super::{Backend, BlockingModel, ItemOutcome};

/// Runs a [`BlockingModel`] on tokio's blocking pool.
///
/// The whole batch moves to one blocking thread and its prompts run there in
/// order, so the scheduler keeps assembling the next batch meanwhile.
pub struct BlockingBackend<M> {
    model: Arc<M>,
}

impl<M> BlockingBackend<M> {
    pub fn new(model: M) -> Self {
        Self {
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl<M> Backend for BlockingBackend<M>
where M: BlockingModel
{
    type Output = M::Output;

    async fn invoke_batch(
        &self,
        batch: &[Request],
    ) -> Result<Vec<ItemOutcome<Self::Output>>, BackendError> {
        let model = self.model.clone();
        let requests = batch.to_vec();
        tokio::task::spawn_blocking(move || {
            requests
                .iter()
                .map(|request| {
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        model.invoke(request.payload(), request.params())
                    }))
                    .unwrap_or_else(|panic| Err(BackendError::from_panic(panic)))
                })
                .collect()
        })
        .await
        .map_err(|err| BackendError::new(format!("blocking backend task failed: {err}")))
    }
}
