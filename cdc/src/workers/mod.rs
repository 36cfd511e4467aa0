//! Worker pools draining the per-sink queues.

pub mod pool;

pub use pool::{SinkStats, SinkStatsSnapshot, SinkWorkerPool};
