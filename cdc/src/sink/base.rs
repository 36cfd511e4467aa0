use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdc_config::shared::{RetryConfig, SinkConfig};

use crate::error::CdcResult;
use crate::types::Record;

/// A downstream consumer of [`Record`]s.
///
/// Writes are issued concurrently by every worker of the sink's pool, so implementations must
/// be safe for concurrent use. Delivery is at least once; writes should be idempotent.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Returns the kind of the sink, used in logs.
    fn name(&self) -> &'static str;

    /// Opens the connection to the target. Called once during pipeline startup.
    async fn connect(&self) -> CdcResult<()> {
        Ok(())
    }

    /// Writes a single record.
    async fn write(&self, record: &Record) -> CdcResult<()>;

    /// Closes the connection once the sink's queue is drained.
    async fn shutdown(&self) -> CdcResult<()> {
        Ok(())
    }
}

/// Shared handle to a sink of any kind, so heterogeneous sinks can run in one pipeline.
pub type BoxedSink = Arc<dyn Sink>;

/// A sink together with the settings of its queue and worker pool.
#[derive(Clone)]
pub struct SinkSpec {
    pub name: String,
    pub sink: BoxedSink,
    pub queue_capacity: usize,
    pub workers: usize,
    pub retry: RetryConfig,
    pub write_timeout: Option<Duration>,
    pub dead_letter: Option<BoxedSink>,
}

impl SinkSpec {
    /// Creates a spec with the default queue capacity and pool size and without retries.
    pub fn new(name: impl Into<String>, sink: BoxedSink) -> Self {
        Self {
            name: name.into(),
            sink,
            queue_capacity: SinkConfig::DEFAULT_QUEUE_CAPACITY,
            workers: SinkConfig::DEFAULT_WORKERS,
            retry: RetryConfig::default(),
            write_timeout: None,
            dead_letter: None,
        }
    }

    /// Creates a spec from configuration and already built sinks.
    pub fn from_config(
        config: &SinkConfig,
        sink: BoxedSink,
        dead_letter: Option<BoxedSink>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            sink,
            queue_capacity: config.queue_capacity,
            workers: config.workers,
            retry: config.retry.clone(),
            write_timeout: config.write_timeout(),
            dead_letter,
        }
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = Some(write_timeout);
        self
    }

    pub fn with_dead_letter(mut self, dead_letter: BoxedSink) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }
}

impl std::fmt::Debug for SinkSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSpec")
            .field("name", &self.name)
            .field("kind", &self.sink.name())
            .field("queue_capacity", &self.queue_capacity)
            .field("workers", &self.workers)
            .field("retry", &self.retry)
            .field("write_timeout", &self.write_timeout)
            .field("dead_letter", &self.dead_letter.as_ref().map(|sink| sink.name()))
            .finish()
    }
}
