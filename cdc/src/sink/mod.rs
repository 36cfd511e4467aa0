//! Downstream targets of the pipeline.
//!
//! Every configured sink gets its own bounded queue and worker pool. A sink only needs to
//! implement [`Sink::write`]; connecting and shutting down are optional.

pub mod alert;
mod base;
pub mod memory;
pub mod postgres;

pub use base::{BoxedSink, Sink, SinkSpec};
