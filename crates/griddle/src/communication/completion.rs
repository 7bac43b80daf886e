use tokio::time::Instant;
use crate::error::BatchError;
use super::RequestId;

/// # Completion
///
/// The outcome of one request, written once into the registry and removed
/// exactly once, either by its originator or by the reaper.
#[derive(Debug)]
pub struct Completion<O> {
    request_id: RequestId,
    outcome: Result<O, BatchError>,
    completed_at: Instant,
}

impl<O> Completion<O> {
    pub fn new(request_id: RequestId, outcome: Result<O, BatchError>) -> Self {
        Self {
            request_id,
            outcome,
            completed_at: Instant::now(),
        }
    }

    /// The request this result belongs to.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn outcome(&self) -> &Result<O, BatchError> {
        &self.outcome
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// When the result was written. Ttl reaping is measured from here.
    pub fn completed_at(&self) -> Instant {
        self.completed_at
    }

    /// Unwraps the completion into the value handed to the originator.
    pub fn into_outcome(self) -> Result<O, BatchError> {
        self.outcome
    }
}
