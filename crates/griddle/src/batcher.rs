use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};
use crate::backend::Backend;
use crate::communication::{Completion, Pill, Request, RequestId};
use crate::config::BatcherConfig;
use crate::core::batch::{BatchPolicy, Dispatcher, batching_loop};
use crate::core::worker::BatchWorkerHandle;
use crate::error::{BatchError, ConfigError};
use crate::invoker::Invoker;
use crate::notifier::{Notifier, Ticket};
use crate::params::GenerationParams;
use crate::queue::{IngressQueue, ingress_queue};
use crate::registry::{Registry, SlotStatus, TakeError};
use crate::stats::{Stats, StatsSnapshot};

/// The ingress operation: submit one prompt and wait for its own result.
#[async_trait]
pub trait Batcher<O> {
    /// Returns once this request's result exists, or with the error that
    /// stopped it: admission, backend, timeout, or shutdown.
    async fn run(&self, payload: String, params: GenerationParams) -> Result<O, BatchError>;
}

/// # DynamicBatcher
///
/// Gathers concurrently submitted prompts into bounded batches, calls the
/// backend once per batch, and routes each output back to the caller that
/// submitted its prompt.
///
/// Construction spawns two background tasks on the current tokio runtime: the
/// accumulator, which assembles and dispatches batches, and a reaper, which
/// clears results nobody came back for.
///
/// ```ignore
/// let batcher = DynamicBatcher::new(PerItem::new(model), BatcherConfig::default())?;
/// let answer = batcher.infer("What is the capital of France?", GenerationParams::new()).await?;
/// ```
pub struct DynamicBatcher<O>
where O: Send + Sync + 'static
{
    ingress: IngressQueue,
    registry: Arc<Registry<O>>,
    stats: Arc<Stats>,
    slots: Arc<Semaphore>,
    config: BatcherConfig,
    accumulator: BatchWorkerHandle,
    reaper: BatchWorkerHandle,
}

impl<O> DynamicBatcher<O>
where O: Send + Sync + 'static
{
    /// Validates `config` and starts the scheduler around `backend`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new<B>(backend: B, config: BatcherConfig) -> Result<Self, ConfigError>
    where B: Backend<Output = O>
    {
        config.validate()?;

        let stats = Arc::new(Stats::default());
        let registry = Arc::new(Registry::with_stats(stats.clone()));
        let (ingress, receiver) = ingress_queue(config.queue_capacity);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_batches));
        let notifier = Notifier::new(registry.clone());
        let invoker = Arc::new(Invoker::new(Arc::new(backend), notifier.clone()));
        let dispatcher = Dispatcher::new(invoker, slots.clone());
        let policy = BatchPolicy {
            max_batch_size: config.max_batch_size,
            max_latency: config.max_latency,
        };

        let accumulator = BatchWorkerHandle::new({
            let stats = stats.clone();
            move |running, wake| {
                tokio::spawn(async move {
                    let _pill = Pill::new();
                    batching_loop(receiver, dispatcher, notifier, policy, stats, running, wake).await;
                })
            }
        });

        let reaper = BatchWorkerHandle::new({
            let registry = registry.clone();
            let ttl = config.result_ttl;
            let every = config.reap_interval;
            move |running, wake| tokio::spawn(reap_loop(registry, ttl, every, running, wake))
        });

        info!(
            max_batch_size = config.max_batch_size,
            max_latency = ?config.max_latency,
            queue_capacity = config.queue_capacity,
            max_concurrent_batches = config.max_concurrent_batches,
            "dynamic batcher started"
        );

        Ok(Self {
            ingress,
            registry,
            stats,
            slots,
            config,
            accumulator,
            reaper,
        })
    }

    /// Admits a prompt and returns the ticket for its result.
    ///
    /// Never waits on batching: a full queue fails with
    /// [`BatchError::Overloaded`] right away.
    pub fn submit(
        &self,
        payload: impl Into<String>,
        params: GenerationParams,
    ) -> Result<Ticket<O>, BatchError> {
        if !self.accumulator.is_running() {
            return Err(BatchError::ShuttingDown);
        }

        let id = match self.registry.register() {
            Ok(id) => id,
            Err(violation) => {
                error!(%violation, "result registry invariant broken");
                panic!("{violation}");
            }
        };
        let request = Request::new(id, payload, params.with_defaults(&self.config.default_params));

        if let Err(err) = self.ingress.enqueue(request) {
            self.registry.withdraw(id);
            self.stats.record_rejected();
            warn!(request_id = %id, error = %err, "request rejected at admission");
            return Err(err);
        }
        self.stats.record_accepted();
        Ok(Ticket::new(id, self.registry.clone(), self.config.wait_timeout))
    }

    /// Submits a prompt and waits, up to the configured wait timeout, for its result.
    pub async fn infer(
        &self,
        payload: impl Into<String>,
        params: GenerationParams,
    ) -> Result<O, BatchError> {
        self.submit(payload, params)?.wait().await
    }

    /// Non-destructive status check for a detached request.
    pub fn poll(&self, id: RequestId) -> SlotStatus {
        self.registry.poll(id)
    }

    /// Takes the result for `id` if it is ready.
    pub fn try_take(&self, id: RequestId) -> Result<Completion<O>, TakeError> {
        self.registry.take(id)
    }

    /// Waits up to `timeout` for the result of a detached request.
    pub async fn wait(&self, id: RequestId, timeout: Duration) -> Result<O, BatchError> {
        self.registry.wait(id, timeout).await
    }

    /// Current scheduler counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The validated configuration this batcher runs with.
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Requests waiting in the ingress queue.
    pub fn queue_len(&self) -> usize {
        self.ingress.len()
    }

    /// Results held in the registry, pending or unretrieved.
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    /// Stops admission and waits for the scheduler to wind down.
    ///
    /// The batch being assembled is still dispatched and every batch in flight
    /// runs to completion; requests left in the queue fail with
    /// [`BatchError::ShuttingDown`]. Results stay retrievable through the
    /// tickets already handed out.
    pub async fn shutdown(self) {
        let Self {
            ingress,
            stats,
            slots,
            config,
            mut accumulator,
            mut reaper,
            ..
        } = self;

        // closing the queue ends assembly at once, whatever the latency budget
        drop(ingress);
        accumulator.shutdown();
        accumulator.join().await;
        reaper.shutdown();
        reaper.join().await;

        let in_flight = u32::try_from(config.max_concurrent_batches).unwrap_or(u32::MAX);
        let _ = slots.acquire_many(in_flight).await;
        info!(stats = ?stats.snapshot(), "dynamic batcher stopped");
    }
}

#[async_trait]
impl<O> Batcher<O> for DynamicBatcher<O>
where O: Send + Sync + 'static
{
    async fn run(&self, payload: String, params: GenerationParams) -> Result<O, BatchError> {
        self.infer(payload, params).await
    }
}

async fn reap_loop<O>(
    registry: Arc<Registry<O>>,
    ttl: Duration,
    every: Duration,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
) where O: Send + Sync + 'static
{
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = tokio::time::sleep(every) => {
                registry.reap(ttl);
            }
            _ = wake.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::time::Instant;
    use crate::backend::mock::MockBackend;
    use crate::backend::{Model, PerItem};
    use crate::error::BackendError;

    fn config(max_batch_size: usize) -> BatcherConfig {
        BatcherConfig::default()
            .with_max_batch_size(max_batch_size)
            .with_max_latency(Duration::from_millis(50))
    }

    fn assert_close(elapsed: Duration, expected: Duration) {
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(2),
            "expected about {expected:?}, got {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_simultaneous_requests_share_one_batch() {
        let backend = MockBackend::new();
        let batcher = DynamicBatcher::new(backend.clone(), config(4)).unwrap();

        let tickets: Vec<_> = (0..4)
            .map(|n| batcher.submit(format!("p{n}"), GenerationParams::new()).unwrap())
            .collect();
        for (n, ticket) in tickets.into_iter().enumerate() {
            assert_eq!(ticket.await, Ok(format!("out:p{n}")));
        }

        assert_eq!(backend.sizes(), vec![4]);
        let stats = batcher.stats();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.flushed_full, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_dispatched_after_max_latency() {
        let backend = MockBackend::new();
        let batcher = DynamicBatcher::new(backend.clone(), config(4)).unwrap();
        let started = Instant::now();

        let output = batcher.infer("alone", GenerationParams::new()).await;

        assert_eq!(output, Ok("out:alone".to_string()));
        assert_close(started.elapsed(), Duration::from_millis(50));
        assert_eq!(backend.sizes(), vec![1]);
        assert_eq!(batcher.stats().flushed_deadline, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_is_split_into_bounded_batches() {
        let backend = MockBackend::new();
        let batcher = DynamicBatcher::new(backend.clone(), config(4)).unwrap();

        let tickets: Vec<_> = (0..10)
            .map(|n| batcher.submit(format!("p{n}"), GenerationParams::new()).unwrap())
            .collect();
        for (n, ticket) in tickets.into_iter().enumerate() {
            assert_eq!(ticket.await, Ok(format!("out:p{n}")));
        }

        assert_eq!(backend.sizes(), vec![4, 4, 2]);
        let order: Vec<String> = backend.batches().concat();
        let expected: Vec<String> = (0..10).map(|n| format!("p{n}")).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_result_is_retrievable_exactly_once() {
        let batcher = DynamicBatcher::new(MockBackend::new(), config(3)).unwrap();

        let ids: Vec<RequestId> = (0..7)
            .map(|n| {
                batcher
                    .submit(format!("p{n}"), GenerationParams::new())
                    .unwrap()
                    .detach()
            })
            .collect();

        for (n, id) in ids.iter().enumerate() {
            let first = batcher.wait(*id, Duration::from_secs(1)).await;
            assert_eq!(first, Ok(format!("out:p{n}")));
            let second = batcher.wait(*id, Duration::from_secs(1)).await;
            assert_eq!(second, Err(BatchError::Unknown(*id)));
        }
        assert_eq!(batcher.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_item_only_fails_itself() {
        let batcher = DynamicBatcher::new(MockBackend::new(), config(3)).unwrap();

        let a = batcher.submit("p0", GenerationParams::new()).unwrap();
        let b = batcher.submit("fail", GenerationParams::new()).unwrap();
        let c = batcher.submit("p2", GenerationParams::new()).unwrap();

        assert_eq!(a.await, Ok("out:p0".to_string()));
        assert_eq!(
            b.await,
            Err(BatchError::Backend(BackendError::new("bad prompt: fail")))
        );
        assert_eq!(c.await, Ok("out:p2".to_string()));

        let stats = batcher.stats();
        assert_eq!(stats.completed_ok, 2);
        assert_eq!(stats.completed_err, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_control_rejects_overflow() {
        let backend = MockBackend::new();
        let batcher = DynamicBatcher::new(
            backend.clone(),
            config(4).with_queue_capacity(2),
        )
        .unwrap();

        // nothing yields between these submissions, so the accumulator cannot drain
        let admitted: Vec<_> = (0..5)
            .map(|n| batcher.submit(format!("p{n}"), GenerationParams::new()))
            .collect();

        let rejected = admitted
            .iter()
            .filter(|r| matches!(r, Err(BatchError::Overloaded { capacity: 2 })))
            .count();
        assert_eq!(rejected, 3);
        assert_eq!(batcher.outstanding(), 2);

        for (n, ticket) in admitted.into_iter().take(2).enumerate() {
            assert_eq!(ticket.unwrap().await, Ok(format!("out:p{n}")));
        }
        assert_eq!(backend.sizes(), vec![2]);
        assert_eq!(batcher.stats().rejected, 3);
        assert_eq!(batcher.stats().accepted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_batch_assembles_while_previous_computes() {
        let backend = MockBackend::new().with_delay(Duration::from_millis(100));
        let batcher = DynamicBatcher::new(backend.clone(), config(2)).unwrap();
        let started = Instant::now();

        let tickets: Vec<_> = (0..4)
            .map(|n| batcher.submit(format!("p{n}"), GenerationParams::new()).unwrap())
            .collect();
        for ticket in tickets {
            assert!(ticket.await.is_ok());
        }

        // two batches of two ran side by side, not back to back
        assert_eq!(backend.sizes(), vec![2, 2]);
        assert_close(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_leaves_nothing_behind() {
        let backend = MockBackend::new().with_delay(Duration::from_millis(200));
        let batcher = DynamicBatcher::new(backend.clone(), config(1)).unwrap();

        let gave_up = tokio::time::timeout(
            Duration::from_millis(20),
            batcher.infer("slow", GenerationParams::new()),
        )
        .await;
        assert!(gave_up.is_err());
        assert_eq!(batcher.outstanding(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(backend.sizes(), vec![1]);
        assert_eq!(batcher.outstanding(), 0);
        assert_eq!(batcher.stats().abandoned, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_is_enforced() {
        let backend = MockBackend::new().with_delay(Duration::from_secs(5));
        let batcher = DynamicBatcher::new(
            backend,
            config(1).with_wait_timeout(Duration::from_secs(1)),
        )
        .unwrap();

        let result = batcher.infer("slow", GenerationParams::new()).await;
        assert_eq!(result, Err(BatchError::Timeout { waited: Duration::from_secs(1) }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unretrieved_results_are_reaped() {
        let batcher = DynamicBatcher::new(
            MockBackend::new(),
            config(2)
                .with_result_ttl(Duration::from_secs(2))
                .with_reap_interval(Duration::from_millis(500)),
        )
        .unwrap();

        let id = batcher
            .submit("forgotten", GenerationParams::new())
            .unwrap()
            .detach();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(batcher.poll(id), SlotStatus::Ready);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(batcher.poll(id), SlotStatus::Unknown);
        assert_eq!(batcher.outstanding(), 0);
        assert_eq!(batcher.stats().reaped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_take_polls_without_blocking() {
        let batcher = DynamicBatcher::new(MockBackend::new(), config(4)).unwrap();
        let id = batcher.submit("p0", GenerationParams::new()).unwrap().detach();

        assert_eq!(batcher.try_take(id).unwrap_err(), TakeError::Pending);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let completion = batcher.try_take(id).unwrap();
        assert_eq!(completion.into_outcome(), Ok("out:p0".to_string()));
        assert_eq!(batcher.try_take(id).unwrap_err(), TakeError::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_in_flight_and_rejects_queued() {
        let backend = MockBackend::new().with_delay(Duration::from_millis(100));
        let batcher = DynamicBatcher::new(
            backend.clone(),
            config(1).with_max_concurrent_batches(1),
        )
        .unwrap();

        let tickets: Vec<_> = (0..3)
            .map(|n| batcher.submit(format!("p{n}"), GenerationParams::new()).unwrap())
            .collect();
        // let the first batch start and the second wait for a free slot
        tokio::time::sleep(Duration::from_millis(10)).await;

        batcher.shutdown().await;

        let results = futures::future::join_all(tickets.into_iter().map(Ticket::wait)).await;
        assert_eq!(results[0], Ok("out:p0".to_string()));
        assert_eq!(results[1], Ok("out:p1".to_string()));
        assert_eq!(results[2], Err(BatchError::ShuttingDown));
        assert_eq!(backend.sizes(), vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_latency_flushes_on_size_and_on_shutdown() {
        let backend = MockBackend::new();
        let batcher = DynamicBatcher::new(
            backend.clone(),
            config(2)
                .with_max_latency(Duration::MAX)
                .with_wait_timeout(Duration::MAX),
        )
        .unwrap();

        let a = batcher.submit("p0", GenerationParams::new()).unwrap();
        let b = batcher.submit("p1", GenerationParams::new()).unwrap();
        assert_eq!(a.await, Ok("out:p0".to_string()));
        assert_eq!(b.await, Ok("out:p1".to_string()));

        // a partial batch would wait forever, so closing the queue must flush it
        let lone = batcher.submit("p2", GenerationParams::new()).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(lone.status(), SlotStatus::Pending);

        batcher.shutdown().await;
        assert_eq!(lone.await, Ok("out:p2".to_string()));
        assert_eq!(backend.sizes(), vec![2, 1]);
    }

    struct ParamEcho;

    #[async_trait]
    impl Model for ParamEcho {
        type Output = serde_json::Value;

        async fn invoke(&self, _prompt: &str, params: &GenerationParams) -> Result<Self::Output, BackendError> {
            Ok(serde_json::to_value(params).map_err(|e| BackendError::new(e.to_string()))?)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_params_are_merged_beneath_request_params() {
        let batcher = DynamicBatcher::new(PerItem::new(ParamEcho), config(1)).unwrap();

        let seen = batcher
            .run("hi".to_string(), GenerationParams::new().with("max_tokens", 8))
            .await
            .unwrap();

        assert_eq!(seen, json!({"max_tokens": 8, "echo": false, "top_k": 1}));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = DynamicBatcher::new(MockBackend::new(), config(0));
        assert!(matches!(result, Err(ConfigError::Zero { field: "max_batch_size" })));
    }
}
