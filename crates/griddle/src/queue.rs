//! # Ingress Queue
//!
//! A bounded FIFO between callers and the batch accumulator, backed by a tokio
//! mpsc channel. The sending half never waits: a full queue rejects the request
//! immediately with [`BatchError::Overloaded`].

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::time::{Duration, Instant};
use crate::communication::{Request, deadline_after};
use crate::error::BatchError;

/// Outcome of a bounded dequeue.
#[derive(Debug)]
pub enum Dequeued {
    Item(Request),
    TimedOut,
    /// Every sender is gone or the queue was closed, and nothing is left.
    Closed,
}

/// Sending half, held by the batcher front end.
#[derive(Debug, Clone)]
pub struct IngressQueue {
    sender: mpsc::Sender<Request>,
    capacity: usize,
}

/// Receiving half, owned by the accumulator.
#[derive(Debug)]
pub struct IngressReceiver {
    receiver: mpsc::Receiver<Request>,
}

/// Creates a queue holding at most `capacity` requests.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn ingress_queue(capacity: usize) -> (IngressQueue, IngressReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        IngressQueue { sender, capacity },
        IngressReceiver { receiver },
    )
}

impl IngressQueue {
    /// Admits `request` without waiting.
    pub fn enqueue(&self, request: Request) -> Result<(), BatchError> {
        match self.sender.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(BatchError::Overloaded {
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(_)) => Err(BatchError::ShuttingDown),
        }
    }

    /// The bound passed to [`ingress_queue`]; the `capacity` reported by
    /// [`BatchError::Overloaded`].
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests currently waiting.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Whether no request is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the receiving half stopped admission.
    ///
    /// Once closed, every [`enqueue`](Self::enqueue) fails with
    /// [`BatchError::ShuttingDown`].
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl IngressReceiver {
    /// Waits, without a bound, for the next request.
    pub async fn dequeue(&mut self) -> Option<Request> {
        self.receiver.recv().await
    }

    /// Waits up to `timeout` for the next request.
    pub async fn dequeue_or_wait(&mut self, timeout: Duration) -> Dequeued {
        self.dequeue_until(deadline_after(Instant::now(), timeout)).await
    }

    /// Waits until `deadline` for the next request.
    ///
    /// A request already sitting in the queue is returned even when the
    /// deadline has passed.
    pub async fn dequeue_until(&mut self, deadline: Instant) -> Dequeued {
        match self.receiver.try_recv() {
            Ok(request) => return Dequeued::Item(request),
            Err(TryRecvError::Disconnected) => return Dequeued::Closed,
            Err(TryRecvError::Empty) => {}
        }
        match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
            Ok(Some(request)) => Dequeued::Item(request),
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::TimedOut,
        }
    }

    /// Takes a request only if one is already waiting.
    pub fn try_dequeue(&mut self) -> Option<Request> {
        self.receiver.try_recv().ok()
    }

    /// Stops admission. Requests already queued can still be dequeued.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
