//! # Correlation Registry
//!
//! Issues correlation ids and holds each request's result until its originator
//! takes it. Every slot moves through a small state machine:
//!
//! ```text
//! register ──> Pending ──complete──> Ready ──take/reap/abandon──> (removed)
//!                 │
//!              abandon
//!                 v
//!             Abandoned ──complete──> (removed, result discarded)
//! ```
//!
//! All access goes through the methods below; the map itself is never shared.

use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use crate::communication::{Completion, RequestId, deadline_after};
use crate::error::{BatchError, InvariantViolation};
use crate::stats::Stats;

enum Slot<O> {
    Pending { notify: Arc<Notify> },
    Ready(Completion<O>),
    Abandoned,
}

/// What a non-destructive [`Registry::poll`] sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Pending,
    Ready,
    /// Never issued, already taken, reaped, or abandoned by its originator.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TakeError {
    #[error("result is not ready yet")]
    Pending,
    #[error("unknown or expired request id")]
    Unknown,
}

/// # Registry
///
/// Concurrency-safe map from [`RequestId`] to that request's result slot.
///
/// Each slot has a single writer (the batch that computed it) and a single
/// reader (its originator). A slot is written at most once and read at most
/// once; the map never hands out references to its contents.
pub struct Registry<O> {
    slots: DashMap<RequestId, Slot<O>>,
    stats: Arc<Stats>,
}

impl<O> Default for Registry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Registry<O> {
    /// Creates an empty registry with its own, unshared counters.
    pub fn new() -> Self {
        Self::with_stats(Arc::new(Stats::default()))
    }

    /// Creates an empty registry recording into `stats`.
    pub(crate) fn with_stats(stats: Arc<Stats>) -> Self {
        Self {
            slots: DashMap::new(),
            stats,
        }
    }

    /// Issues a fresh correlation id and opens a pending slot for it.
    pub fn register(&self) -> Result<RequestId, InvariantViolation> {
        self.register_id(RequestId::new())
    }

    /// Opens a pending slot under a caller-chosen id.
    ///
    /// # Returns
    ///
    /// The id itself, or [`InvariantViolation::DuplicateId`] if a slot for it
    /// already exists.
    pub(crate) fn register_id(&self, id: RequestId) -> Result<RequestId, InvariantViolation> {
        match self.slots.entry(id) {
            Entry::Occupied(_) => Err(InvariantViolation::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(Slot::Pending {
                    notify: Arc::new(Notify::new()),
                });
                Ok(id)
            }
        }
    }

    /// Drops a pending slot whose request never made it into the queue.
    pub(crate) fn withdraw(&self, id: RequestId) {
        self.slots
            .remove_if(&id, |_, slot| matches!(slot, Slot::Pending { .. }));
    }

    /// Writes the result for `id` and wakes its waiter.
    ///
    /// A slot is written at most once. If the originator already gave up, the
    /// result is dropped on the spot.
    pub fn complete(
        &self,
        id: RequestId,
        outcome: Result<O, BatchError>,
    ) -> Result<(), InvariantViolation> {
        let ok = outcome.is_ok();
        let mut entry = match self.slots.entry(id) {
            Entry::Vacant(_) => return Err(InvariantViolation::CompleteUnregistered(id)),
            Entry::Occupied(entry) => entry,
        };
        let waiter = match entry.get() {
            Slot::Ready(_) => return Err(InvariantViolation::DoubleComplete(id)),
            Slot::Abandoned => None,
            Slot::Pending { notify } => Some(notify.clone()),
        };
        self.stats.record_completion(ok);
        match waiter {
            None => {
                entry.remove();
                debug!(request_id = %id, "discarded result of abandoned request");
            }
            Some(notify) => {
                entry.insert(Slot::Ready(Completion::new(id, outcome)));
                drop(entry);
                notify.notify_one();
            }
        }
        Ok(())
    }

    /// Reports where `id` stands without consuming its result.
    ///
    /// # Returns
    ///
    /// * [`SlotStatus::Pending`] - registered, no result yet
    /// * [`SlotStatus::Ready`] - a result is waiting to be taken
    /// * [`SlotStatus::Unknown`] - never issued, already taken, reaped or abandoned
    pub fn poll(&self, id: RequestId) -> SlotStatus {
        match self.slots.get(&id).as_deref() {
            Some(Slot::Pending { .. }) => SlotStatus::Pending,
            Some(Slot::Ready(_)) => SlotStatus::Ready,
            Some(Slot::Abandoned) | None => SlotStatus::Unknown,
        }
    }

    /// Removes and returns the result for `id` if it is ready.
    pub fn take(&self, id: RequestId) -> Result<Completion<O>, TakeError> {
        let removed = self
            .slots
            .remove_if(&id, |_, slot| matches!(slot, Slot::Ready(_)));
        match removed {
            Some((_, Slot::Ready(completion))) => Ok(completion),
            Some(_) => Err(TakeError::Unknown),
            None => match self.poll(id) {
                SlotStatus::Pending => Err(TakeError::Pending),
                _ => Err(TakeError::Unknown),
            },
        }
    }

    /// Waits up to `timeout` for the result of `id`, then takes it.
    ///
    /// On timeout, or if the returned future is dropped before finishing, the
    /// slot is abandoned and a late result is discarded instead of delivered.
    pub async fn wait(&self, id: RequestId, timeout: Duration) -> Result<O, BatchError> {
        let deadline = deadline_after(Instant::now(), timeout);
        let mut guard = AbandonOnDrop::new(self, id);
        loop {
            match self.take(id) {
                Ok(completion) => {
                    guard.disarm();
                    return completion.into_outcome();
                }
                Err(TakeError::Unknown) => {
                    guard.disarm();
                    return Err(BatchError::Unknown(id));
                }
                Err(TakeError::Pending) => {}
            }

            let Some(notify) = self.pending_notify(id) else {
                continue;
            };
            if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                guard.disarm();
                self.abandon(id);
                warn!(request_id = %id, waited = ?timeout, "gave up waiting for result");
                return Err(BatchError::Timeout { waited: timeout });
            }
        }
    }

    /// Marks `id` as no longer wanted.
    pub fn abandon(&self, id: RequestId) {
        let Entry::Occupied(mut entry) = self.slots.entry(id) else {
            return;
        };
        match entry.get() {
            Slot::Abandoned => {}
            Slot::Ready(_) => {
                entry.remove();
                self.stats.record_abandoned();
            }
            Slot::Pending { .. } => {
                entry.insert(Slot::Abandoned);
                self.stats.record_abandoned();
            }
        }
    }

    /// Removes ready results nobody took within `ttl`. Pending slots are kept.
    pub fn reap(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut reaped = 0;
        self.slots.retain(|_, slot| match slot {
            Slot::Ready(completion)
                if now.saturating_duration_since(completion.completed_at()) >= ttl =>
            {
                reaped += 1;
                false
            }
            _ => true,
        });
        if reaped > 0 {
            self.stats.record_reaped(reaped);
            debug!(reaped, "reaped unretrieved results");
        }
        reaped
    }

    /// Number of slots held, in any state.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is held at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn pending_notify(&self, id: RequestId) -> Option<Arc<Notify>> {
        match self.slots.get(&id).as_deref() {
            Some(Slot::Pending { notify }) => Some(notify.clone()),
            _ => None,
        }
    }
}

struct AbandonOnDrop<'a, O> {
    registry: &'a Registry<O>,
    id: RequestId,
    armed: bool,
}

impl<'a, O> AbandonOnDrop<'a, O> {
    fn new(registry: &'a Registry<O>, id: RequestId) -> Self {
        Self {
            registry,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<O> Drop for AbandonOnDrop<'_, O> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abandon(self.id);
        }
    }
}
