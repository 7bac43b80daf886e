use std::fmt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;
use crate::params::GenerationParams;

/// Correlation id linking a submitted request to its eventual result.
///
/// Ids are random v4 UUIDs, so they carry no memory-layout identity and stay
/// unique if they ever leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Draws a fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RequestId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// # Request
///
/// A single prompt waiting to be batched.
///
/// Created at ingress and immutable afterwards. The ingress queue owns it until
/// the accumulator dequeues it into a [`Batch`](super::Batch).
#[derive(Debug, Clone)]
pub struct Request {
    id: RequestId,
    payload: String,
    params: GenerationParams,
    enqueued_at: Instant,
}

impl Request {
    pub fn new(id: RequestId, payload: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            id,
            payload: payload.into(),
            params,
            enqueued_at: Instant::now(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The prompt text.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// When the request was accepted at ingress.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }
}
