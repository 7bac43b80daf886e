//! # Scheduling Core
//!
//! * [`batch`] - the batch accumulator: the size-or-deadline assembly loop and
//!   the dispatcher that hands finished batches to the invoker.
//! * [`worker`] - [`BatchWorkerHandle`](worker::BatchWorkerHandle), which owns a
//!   background task together with its running flag and wake-up signal.
pub(crate) mod batch;
pub(crate) mod worker;
