//! Concurrency primitives coordinating the pipeline stages.
//!
//! - [`shutdown`] broadcasts the single cancellation signal observed by sources.
//! - [`queue`] provides the bounded queues between stages; closing happens by dropping every
//!   sender, which is how the dispatcher and worker pools learn that they can stop.
//! - [`scope`] owns every spawned task so shutdown can wait on all of them at once.

pub mod queue;
pub mod scope;
pub mod shutdown;
