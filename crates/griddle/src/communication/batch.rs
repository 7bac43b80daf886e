use std::fmt;
use tokio::time::{Duration, Instant};
use super::Request;

/// Roughly 30 years, the horizon tokio itself treats as "never".
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Upper bound on the slots a new batch reserves up front.
const PREALLOCATE_AT_MOST: usize = 1024;

/// `start + span`, saturating at a far-future instant instead of overflowing.
pub(crate) fn deadline_after(start: Instant, span: Duration) -> Instant {
    start
        .checked_add(span)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Why the accumulator stopped growing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The batch reached `max_batch_size`.
    Full,
    /// The latency budget measured from the first request ran out.
    Deadline,
    /// The ingress queue closed while the batch was filling.
    Closed,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushReason::Full => write!(f, "full"),
            FlushReason::Deadline => write!(f, "deadline"),
            FlushReason::Closed => write!(f, "closed"),
        }
    }
}

/// # Batch
///
/// An ordered group of requests dispatched to the backend in one call.
///
/// A batch always holds at least one request: it is started from the request
/// that opened it, and that request's arrival anchors the latency window.
/// Position in `requests` is the position the backend's outputs are matched by.
#[derive(Debug)]
pub struct Batch {
    requests: Vec<Request>,
    assembly_started_at: Instant,
}

impl Batch {
    /// Opens a batch with its first request.
    pub fn start(first: Request, capacity: usize) -> Self {
        let assembly_started_at = first.enqueued_at();
        let mut requests = Vec::with_capacity(capacity.clamp(1, PREALLOCATE_AT_MOST));
        requests.push(first);
        Self {
            requests,
            assembly_started_at,
        }
    }

    pub fn push(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Arrival time of the first request.
    pub fn assembly_started_at(&self) -> Instant {
        self.assembly_started_at
    }

    /// The instant after which the batch must be flushed regardless of size.
    ///
    /// A `max_latency` too large to represent yields a deadline decades out,
    /// so such a batch only ever flushes when full or closed.
    pub fn deadline(&self, max_latency: Duration) -> Instant {
        deadline_after(self.assembly_started_at, max_latency)
    }

    /// Hands the requests off, discarding the batch.
    pub fn into_requests(self) -> Vec<Request> {
        self.requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::RequestId;
    use crate::params::GenerationParams;

    fn request(payload: &str) -> Request {
        Request::new(RequestId::new(), payload, GenerationParams::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchor_is_first_arrival() {
        let first = request("p0");
        let arrived = first.enqueued_at();

        tokio::time::advance(Duration::from_millis(20)).await;
        let mut batch = Batch::start(first, 4);
        batch.push(request("p1"));

        assert_eq!(batch.assembly_started_at(), arrived);
        assert_eq!(
            batch.deadline(Duration::from_millis(50)),
            arrived + Duration::from_millis(50)
        );
    }

    #[tokio::test]
    async fn test_preserves_push_order() {
        let mut batch = Batch::start(request("p0"), 3);
        batch.push(request("p1"));
        batch.push(request("p2"));

        let payloads: Vec<String> = batch
            .into_requests()
            .into_iter()
            .map(|r| r.payload().to_string())
            .collect();
        assert_eq!(payloads, vec!["p0", "p1", "p2"]);
    }

    #[tokio::test]
    async fn test_unrepresentable_latency_saturates() {
        let first = request("p0");
        let arrived = first.enqueued_at();
        let batch = Batch::start(first, usize::MAX);

        let deadline = batch.deadline(Duration::MAX);
        assert!(deadline > arrived + Duration::from_secs(86400 * 365));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_flush_reason_display() {
        assert_eq!(FlushReason::Full.to_string(), "full");
        assert_eq!(FlushReason::Deadline.to_string(), "deadline");
        assert_eq!(FlushReason::Closed.to_string(), "closed");
    }
}
