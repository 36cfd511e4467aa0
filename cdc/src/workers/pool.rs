use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cdc_config::shared::RetryConfig;
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::cdc_error;
use crate::concurrency::queue::QueueRx;
use crate::concurrency::scope::TaskScope;
use crate::error::{CdcResult, ErrorKind};
use crate::metrics::{
    CDC_SINK_RECORDS_DEAD_LETTERED_TOTAL, CDC_SINK_RECORDS_DROPPED_TOTAL,
    CDC_SINK_RECORDS_WRITTEN_TOTAL, CDC_SINK_WRITE_DURATION_SECONDS,
    CDC_SINK_WRITE_FAILURES_TOTAL, SINK_LABEL,
};
use crate::sink::{BoxedSink, SinkSpec};
use crate::types::Record;

/// Delivery counters of one sink, shared by all of its workers.
#[derive(Debug, Default)]
pub struct SinkStats {
    written: AtomicU64,
    write_failures: AtomicU64,
    dropped: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`SinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStatsSnapshot {
    pub written: u64,
    /// Failed attempts, so one record retried three times counts three.
    pub write_failures: u64,
    pub dropped: u64,
    pub dead_lettered: u64,
}

impl SinkStats {
    pub fn snapshot(&self) -> SinkStatsSnapshot {
        SinkStatsSnapshot {
            written: self.written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

struct WorkerContext {
    sink_name: String,
    sink: BoxedSink,
    retry: RetryConfig,
    write_timeout: Option<Duration>,
    dead_letter: Option<BoxedSink>,
    stats: Arc<SinkStats>,
}

impl WorkerContext {
    /// Delivers one record, retrying and dead-lettering as configured.
    ///
    /// Never fails: a record that cannot be delivered is logged and dropped so the worker keeps
    /// draining its queue.
    async fn deliver(&self, record: Record) {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            match self.write_once(&record).await {
                Ok(()) => {
                    self.stats.written.fetch_add(1, Ordering::Relaxed);
                    counter!(CDC_SINK_RECORDS_WRITTEN_TOTAL, SINK_LABEL => self.sink_name.clone())
                        .increment(1);
                    histogram!(CDC_SINK_WRITE_DURATION_SECONDS, SINK_LABEL => self.sink_name.clone())
                        .record(started.elapsed().as_secs_f64());

                    return;
                }
                Err(err) => {
                    self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    counter!(CDC_SINK_WRITE_FAILURES_TOTAL, SINK_LABEL => self.sink_name.clone())
                        .increment(1);

                    if attempt < max_attempts {
                        let delay = self.retry.delay_after(attempt);
                        warn!(
                            sink = %self.sink_name,
                            id = %record.id,
                            attempt,
                            max_attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %err,
                            "sink write failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        error!(
                            sink = %self.sink_name,
                            id = %record.id,
                            attempts = max_attempts,
                            error = %err,
                            "sink write failed"
                        );
                    }
                }
            }
        }

        self.give_up(record).await;
    }

    async fn write_once(&self, record: &Record) -> CdcResult<()> {
        let Some(write_timeout) = self.write_timeout else {
            return self.sink.write(record).await;
        };

        match tokio::time::timeout(write_timeout, self.sink.write(record)).await {
            Ok(result) => result,
            Err(_) => Err(cdc_error!(
                ErrorKind::SinkWriteTimeout,
                "Sink write timed out",
                format!("{} after {write_timeout:?}", self.sink_name)
            )),
        }
    }

    async fn give_up(&self, record: Record) {
        if let Some(dead_letter) = &self.dead_letter {
            match dead_letter.write(&record).await {
                Ok(()) => {
                    self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    counter!(CDC_SINK_RECORDS_DEAD_LETTERED_TOTAL, SINK_LABEL => self.sink_name.clone())
                        .increment(1);
                    debug!(sink = %self.sink_name, id = %record.id, "record dead-lettered");

                    return;
                }
                Err(err) => {
                    error!(
                        sink = %self.sink_name,
                        id = %record.id,
                        error = %err,
                        "dead-letter write failed"
                    );
                }
            }
        }

        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        counter!(CDC_SINK_RECORDS_DROPPED_TOTAL, SINK_LABEL => self.sink_name.clone()).increment(1);
    }
}

/// Fixed-size pool of workers draining one sink queue.
///
/// Workers compete for records on the same queue, so with more than one worker two records of
/// the same `id` may be written in either order. Workers stop only when the queue is closed and
/// drained.
pub struct SinkWorkerPool {
    context: Arc<WorkerContext>,
    workers: usize,
    queue: QueueRx,
}

impl SinkWorkerPool {
    pub fn new(spec: &SinkSpec, queue: QueueRx, stats: Arc<SinkStats>) -> Self {
        Self {
            context: Arc::new(WorkerContext {
                sink_name: spec.name.clone(),
                sink: spec.sink.clone(),
                retry: spec.retry.clone(),
                write_timeout: spec.write_timeout,
                dead_letter: spec.dead_letter.clone(),
                stats,
            }),
            workers: spec.workers.max(1),
            queue,
        }
    }

    /// Spawns every worker of the pool into `scope`.
    pub fn spawn(self, scope: &mut TaskScope) {
        info!(
            sink = %self.context.sink_name,
            kind = self.context.sink.name(),
            workers = self.workers,
            "starting sink worker pool"
        );

        for worker_id in 0..self.workers {
            let context = self.context.clone();
            let queue = self.queue.clone();

            scope.spawn(
                format!("sink:{}:worker:{worker_id}", context.sink_name),
                run_worker(context, queue, worker_id),
            );
        }
    }
}

async fn run_worker(context: Arc<WorkerContext>, queue: QueueRx, worker_id: usize) -> CdcResult<()> {
    while let Some(record) = queue.recv().await {
        context.deliver(record).await;
    }

    debug!(sink = %context.sink_name, worker_id, "sink queue drained, worker stopping");

    Ok(())
}
