//! # Griddle
//!
//! A dynamic batching scheduler that sits in front of a batch-capable
//! inference backend.
//!
//! ## Overview
//!
//! Callers submit one prompt at a time. Griddle gathers concurrently submitted
//! prompts into batches bounded by size and by latency, invokes the backend
//! once per batch, and routes every output back to exactly the caller that
//! submitted its prompt.
//!
//! Key components include:
//!
//! - A bounded ingress queue that rejects work instead of blocking when full
//! - A batch accumulator that flushes on size or on deadline, whichever first
//! - A result registry correlating each request with its eventual outcome
//! - Backend adapters for per-prompt, atomic batch, and blocking models
//!
//! ## Architecture
//!
//! ### Flush policy
//!
//! A batch is flushed as soon as it holds `max_batch_size` requests, or once
//! `max_latency` has passed since its first request arrived. A lone request is
//! therefore never held for longer than `max_latency` before it is computed.
//!
//! ### Results
//!
//! Every admitted request ends with exactly one outcome: its output, its own
//! backend error, a timeout, or a shutdown rejection. Outcomes are retrieved
//! through a [`Ticket`], or by [`RequestId`] through
//! [`DynamicBatcher::poll`] and [`DynamicBatcher::try_take`]. A result is
//! handed out at most once; results nobody collects are reaped after
//! `result_ttl`.
//!
//! ### Backend traits
//!
//! The scheduler only depends on [`backend::Backend`]. Implement it directly,
//! or wrap a [`backend::Model`], [`backend::BatchModel`] or
//! [`backend::BlockingModel`] in the matching adapter.
//!
//! ## Features
//!
//! - **blocking** - Enables [`backend::BlockingBackend`] for synchronous models
//!
//! ## Example
//!
//! ```ignore
//! use griddle::{BatcherConfig, DynamicBatcher, GenerationParams};
//! use griddle::backend::PerItem;
//!
//! let batcher = DynamicBatcher::new(PerItem::new(model), BatcherConfig::default())?;
//! let ticket = batcher.submit("Hello", GenerationParams::new().with("max_tokens", 16))?;
//! let output = ticket.await?;
//! batcher.shutdown().await;
//! ```

mod batcher;
mod communication;
mod config;
mod core;
mod error;
mod invoker;
mod notifier;
mod params;
mod queue;
mod registry;
mod stats;

pub mod backend;

pub use batcher::{Batcher, DynamicBatcher};
pub use communication::{Batch, Completion, FlushReason, Request, RequestId};
pub use config::BatcherConfig;
pub use error::{BackendError, BatchError, ConfigError, ErrorBody, ErrorKind, InvariantViolation};
pub use notifier::Ticket;
pub use params::GenerationParams;
pub use queue::{Dequeued, IngressQueue, IngressReceiver, ingress_queue};
pub use registry::{Registry, SlotStatus, TakeError};
pub use stats::StatsSnapshot;
