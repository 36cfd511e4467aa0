//! Change logs polled by the poll source.

mod memory;
mod postgres;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::CdcResult;

pub use memory::MemoryChangeLog;
pub use postgres::PgChangeLog;

/// The range of logical time a single poll asks for: `(after, until]`, at most `limit` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    pub after: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub limit: usize,
}

impl PollWindow {
    pub fn contains(&self, logical_time: DateTime<Utc>) -> bool {
        logical_time > self.after && logical_time <= self.until
    }
}

/// One entry of the change log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRow {
    pub logical_time: DateTime<Utc>,
    /// The row as a JSON object, decoded like a broker payload.
    pub payload: serde_json::Value,
}

/// A table-like log of changes ordered by logical time.
pub trait ChangeLog: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = CdcResult<()>> + Send;

    /// Returns rows inside `window` ordered by logical time.
    fn fetch(&self, window: &PollWindow) -> impl Future<Output = CdcResult<Vec<ChangeRow>>> + Send;

    fn close(&self) -> impl Future<Output = CdcResult<()>> + Send;
}
