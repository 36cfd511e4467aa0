//! Telemetry change-data-capture pipeline.
//!
//! Records flow from a [`source::Source`] through a bounded ingestion queue to a dispatcher,
//! which offers each record to the queue of every configured sink. Each sink queue is drained by
//! its own pool of workers.

pub mod concurrency;
pub mod dispatcher;
pub mod error;
mod macros;
pub mod metrics;
pub mod pipeline;
mod postgres;
pub mod sink;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
