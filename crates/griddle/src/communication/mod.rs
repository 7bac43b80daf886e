mod batch;
mod completion;
mod pill;
mod request;

pub use batch::{Batch, FlushReason};
pub(crate) use batch::deadline_after;
pub use completion::Completion;
pub(crate) use pill::Pill;
pub use request::{Request, RequestId};
