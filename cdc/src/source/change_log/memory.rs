use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::source::change_log::{ChangeLog, ChangeRow, PollWindow};
use crate::types::Record;

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<ChangeRow>,
    fetched_at: Vec<Instant>,
    fail_next: usize,
    ignore_window_bounds: bool,
    connected: bool,
}

/// In-memory change log for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryChangeLog {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record, using its `entry_time` as logical time.
    pub async fn insert(&self, record: &Record) -> CdcResult<()> {
        let payload = serde_json::to_value(record)?;
        self.insert_raw(record.entry_time, payload).await;

        Ok(())
    }

    /// Appends a row with an arbitrary payload.
    pub async fn insert_raw(&self, logical_time: DateTime<Utc>, payload: serde_json::Value) {
        self.inner.lock().await.rows.push(ChangeRow {
            logical_time,
            payload,
        });
    }

    /// Makes the next `count` fetches fail.
    pub async fn fail_next_fetches(&self, count: usize) {
        self.inner.lock().await.fail_next = count;
    }

    /// Returns rows regardless of the requested window, like a log that does not filter
    /// precisely.
    pub async fn ignore_window_bounds(&self, ignore: bool) {
        self.inner.lock().await.ignore_window_bounds = ignore;
    }

    pub async fn fetch_count(&self) -> usize {
        self.inner.lock().await.fetched_at.len()
    }

    /// Instants at which each fetch started, in order.
    pub async fn fetch_instants(&self) -> Vec<Instant> {
        self.inner.lock().await.fetched_at.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }
}

impl ChangeLog for MemoryChangeLog {
    async fn connect(&self) -> CdcResult<()> {
        self.inner.lock().await.connected = true;
        info!("connected to memory change log");

        Ok(())
    }

    async fn fetch(&self, window: &PollWindow) -> CdcResult<Vec<ChangeRow>> {
        let mut inner = self.inner.lock().await;
        inner.fetched_at.push(Instant::now());

        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            bail!(ErrorKind::SourceQueryFailed, "Injected change log failure");
        }

        let mut rows: Vec<ChangeRow> = inner
            .rows
            .iter()
            .filter(|row| inner.ignore_window_bounds || window.contains(row.logical_time))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.logical_time);
        rows.truncate(window.limit);

        Ok(rows)
    }

    async fn close(&self) -> CdcResult<()> {
        self.inner.lock().await.connected = false;

        Ok(())
    }
}
