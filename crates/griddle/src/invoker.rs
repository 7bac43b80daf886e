//! # Invoker
//!
//! Calls the backend on one assembled batch and hands each request its own
//! outcome. Whatever the backend does, every request of the batch ends up with
//! exactly one result:
//!
//! * per-item outcomes are delivered positionally,
//! * a failed call fans its error out to the whole batch,
//! * a call that panics, or that returns the wrong number of outcomes, is
//!   treated as a failed call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{info, warn};
use crate::backend::{Backend, ItemOutcome};
use crate::communication::Batch;
use crate::error::{BackendError, BatchError};
use crate::notifier::Notifier;

pub(crate) struct Invoker<B: Backend> {
    backend: Arc<B>,
    notifier: Notifier<B::Output>,
}

impl<B: Backend> Invoker<B> {
    pub fn new(backend: Arc<B>, notifier: Notifier<B::Output>) -> Self {
        Self { backend, notifier }
    }

    pub async fn invoke(&self, batch: Batch) {
        let started = Instant::now();
        let size = batch.len();
        let requests = batch.into_requests();

        let call = AssertUnwindSafe(self.backend.invoke_batch(&requests))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(BackendError::from_panic(panic)));
        let outcomes = align_outcomes(size, call);

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        self.notifier.publish(&requests, outcomes);

        if failed > 0 {
            warn!(size, failed, "batch finished with errors");
        }
        info!(size, elapsed = ?started.elapsed(), "batch processed");
    }
}

/// Maps a backend call onto exactly `size` per-request outcomes.
pub(crate) fn align_outcomes<O>(
    size: usize,
    call: Result<Vec<ItemOutcome<O>>, BackendError>,
) -> Vec<Result<O, BatchError>> {
    let err = match call {
        Ok(outputs) if outputs.len() == size => {
            return outputs
                .into_iter()
                .map(|outcome| outcome.map_err(BatchError::from))
                .collect();
        }
        Ok(outputs) => BackendError::new(format!(
            "backend returned {} outputs for a batch of {}",
            outputs.len(),
            size
        )),
        Err(err) => err,
    };
    warn!(size, error = %err, "backend call failed for the whole batch");
    let err = BatchError::Backend(err);
    (0..size).map(|_| Err(err.clone())).collect()
}
