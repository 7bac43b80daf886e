use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Duration;
use tracing::{debug, warn};
use crate::backend::Backend;
use crate::communication::{Batch, FlushReason, Pill, Request};
use crate::error::BatchError;
use crate::invoker::Invoker;
use crate::notifier::Notifier;
use crate::queue::{Dequeued, IngressReceiver};
use crate::stats::Stats;

/// Size-or-deadline flush policy.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchPolicy {
    pub max_batch_size: usize,
    pub max_latency: Duration,
}

/// Grows a batch from `first` until it is full or its latency budget is spent.
///
/// The budget runs from the first request's arrival, not from when this call
/// started, so a request never sits in assembly longer than `max_latency`.
/// Reaching `max_batch_size` flushes at once without waiting out the budget.
pub(crate) async fn accumulate(
    ingress: &mut IngressReceiver,
    first: Request,
    policy: &BatchPolicy,
) -> (Batch, FlushReason) {
    let mut batch = Batch::start(first, policy.max_batch_size);
    let deadline = batch.deadline(policy.max_latency);

    while batch.len() < policy.max_batch_size {
        match ingress.dequeue_until(deadline).await {
            Dequeued::Item(request) => batch.push(request),
            Dequeued::TimedOut => return (batch, FlushReason::Deadline),
            Dequeued::Closed => return (batch, FlushReason::Closed),
        }
    }
    (batch, FlushReason::Full)
}

/// Hands batches to the invoker on their own tasks, at most `slots` at a time.
pub(crate) struct Dispatcher<B: Backend> {
    invoker: Arc<Invoker<B>>,
    slots: Arc<Semaphore>,
}

impl<B: Backend> Dispatcher<B> {
    pub fn new(invoker: Arc<Invoker<B>>, slots: Arc<Semaphore>) -> Self {
        Self { invoker, slots }
    }

    /// Waits for a free slot, then runs `batch` in the background.
    pub async fn dispatch(&self, batch: Batch) {
        let permit: Option<OwnedSemaphorePermit> = self.slots.clone().acquire_owned().await.ok();
        let invoker = self.invoker.clone();
        tokio::spawn(async move {
            let _pill = Pill::new();
            let _permit = permit;
            invoker.invoke(batch).await;
        });
    }
}

/// The accumulator task.
///
/// Blocks for the first request of each batch, grows it per `policy`, and
/// dispatches it, so the next batch assembles while the previous one computes.
/// Once stopped, requests still queued are failed with `ShuttingDown`.
pub(crate) async fn batching_loop<B: Backend>(
    mut ingress: IngressReceiver,
    dispatcher: Dispatcher<B>,
    notifier: Notifier<B::Output>,
    policy: BatchPolicy,
    stats: Arc<Stats>,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let first = tokio::select! {
            biased;
            _ = wake.notified() => continue,
            next = ingress.dequeue() => match next {
                Some(request) => request,
                None => break,
            },
        };

        let (batch, reason) = accumulate(&mut ingress, first, &policy).await;
        stats.record_batch(reason);
        debug!(
            size = batch.len(),
            %reason,
            assembly = ?batch.assembly_started_at().elapsed(),
            "flushing batch"
        );
        dispatcher.dispatch(batch).await;

        if reason == FlushReason::Closed {
            break;
        }
    }

    ingress.close();
    let mut leftover = Vec::new();
    while let Some(request) = ingress.dequeue().await {
        leftover.push(request);
    }
    if !leftover.is_empty() {
        warn!(count = leftover.len(), "rejecting queued requests on shutdown");
        notifier.fail_all(&leftover, BatchError::ShuttingDown);
    }
    debug!("batching loop stopped");
}
