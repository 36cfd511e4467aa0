use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CdcResult;
use crate::sink::Sink;
use crate::types::Record;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Record>,
    connected: bool,
    shut_down: bool,
}

/// In-memory sink for tests and local runs.
///
/// Records are kept in arrival order; with more than one worker that order is the order in
/// which writes completed, not the order in which records were dispatched.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record written so far.
    pub async fn records(&self) -> Vec<Record> {
        self.inner.lock().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn is_shut_down(&self) -> bool {
        self.inner.lock().await.shut_down
    }

    pub async fn clear(&self) {
        self.inner.lock().await.records.clear();
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> CdcResult<()> {
        self.inner.lock().await.connected = true;
        Ok(())
    }

    async fn write(&self, record: &Record) -> CdcResult<()> {
        debug!(id = %record.id, entry_time = %record.entry_time, "storing record in memory");
        self.inner.lock().await.records.push(record.clone());

        Ok(())
    }

    async fn shutdown(&self) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        inner.connected = false;
        inner.shut_down = true;

        Ok(())
    }
}
