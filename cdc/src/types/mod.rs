//! Values flowing through the pipeline.

mod record;

pub use record::{DecodeError, Record};
