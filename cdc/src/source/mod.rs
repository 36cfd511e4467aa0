//! Sources feeding the ingestion queue: a broker subscription or a polled change log.

mod base;
pub mod broker;
pub mod change_log;
pub mod poll;
pub mod push;
mod watermark;

pub use base::Source;
pub use poll::{PollOutcome, PollSource};
pub use push::{PushSource, PushSourceStatsSnapshot};
pub use watermark::Watermark;
