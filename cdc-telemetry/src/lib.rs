//! Logging and metrics setup shared by the pipeline binaries and tests.

pub mod metrics;
pub mod tracing;
