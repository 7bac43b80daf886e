//! # Compute Backends
//!
//! The scheduler only ever talks to a [`Backend`]. The adapters here build one
//! from the shape of model you actually have:
//!
//! | you have | wrap it in | one item fails | whole call fails |
//! |---|---|---|---|
//! | [`Model`] (async, per prompt) | [`PerItem`] | that item errors | n/a |
//! | [`BatchModel`] (async, atomic) | [`Atomic`] | n/a | every item errors |
//! | [`BlockingModel`] (sync, per prompt) | [`BlockingBackend`] | that item errors | every item errors |
//!
//! Panics raised by a per-item call are caught and reported as that item's
//! error. Panics escaping a whole batch call are caught by the invoker.

mod atomic;
mod core_trait;
mod per_item;

#[cfg_attr(docsrs, doc(cfg(feature = "blocking")))]
#[cfg(feature = "blocking")]
mod blocking;

pub use atomic::Atomic;
pub use core_trait::*;
pub use per_item::PerItem;

#[cfg(feature = "blocking")]
pub use blocking::BlockingBackend;

#[cfg(test)]
pub(crate) mod mock;
