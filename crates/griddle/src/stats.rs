use std::sync::atomic::{AtomicU64, Ordering};
use serde::Serialize;
use crate::communication::FlushReason;

/// Running counters shared by every stage of the pipeline.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    batches: AtomicU64,
    flushed_full: AtomicU64,
    flushed_deadline: AtomicU64,
    completed_ok: AtomicU64,
    completed_err: AtomicU64,
    abandoned: AtomicU64,
    reaped: AtomicU64,
}

/// Point-in-time copy of the scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Requests admitted into the ingress queue.
    pub accepted: u64,
    /// Requests turned away at admission.
    pub rejected: u64,
    /// Batches handed to the backend.
    pub batches: u64,
    /// Batches flushed because they reached `max_batch_size`.
    pub flushed_full: u64,
    /// Batches flushed because their latency budget ran out.
    pub flushed_deadline: u64,
    /// Results written with an output.
    pub completed_ok: u64,
    /// Results written with an error, including shutdown rejections.
    pub completed_err: u64,
    /// Results whose originator stopped waiting.
    pub abandoned: u64,
    /// Unretrieved results removed after their ttl.
    pub reaped: u64,
}

impl Stats {
    /// Counts one request admitted into the queue.
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one request refused at admission.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one dispatched batch under its flush reason.
    ///
    /// # Parameters
    ///
    /// * `reason` - why the accumulator stopped growing the batch. Batches
    ///   flushed because the queue closed only count towards `batches`.
    pub fn record_batch(&self, reason: FlushReason) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        match reason {
            FlushReason::Full => self.flushed_full.fetch_add(1, Ordering::Relaxed),
            FlushReason::Deadline => self.flushed_deadline.fetch_add(1, Ordering::Relaxed),
            FlushReason::Closed => 0,
        };
    }

    /// Counts one result written to the registry.
    pub fn record_completion(&self, ok: bool) {
        if ok {
            self.completed_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed_err.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts one request whose originator stopped waiting.
    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts `count` results removed by the reaper.
    pub fn record_reaped(&self, count: usize) {
        self.reaped.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Copies every counter.
    ///
    /// Counters are read one by one, so a snapshot taken under load may be
    /// off by requests still in motion between two reads.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            flushed_full: self.flushed_full.load(Ordering::Relaxed),
            flushed_deadline: self.flushed_deadline.load(Ordering::Relaxed),
            completed_ok: self.completed_ok.load(Ordering::Relaxed),
            completed_err: self.completed_err.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
        }
    }
}
