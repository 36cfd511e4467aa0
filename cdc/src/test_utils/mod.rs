//! Helpers for testing pipelines without external services.
//!
//! - [`notify`] - notifications that fail the test instead of hanging
//! - [`record`] - record and payload builders
//! - [`sink`] - sinks that block, fail or record what they receive
//! - [`source`] - a source driven directly by the test

pub mod notify;
pub mod record;
pub mod sink;
pub mod source;
