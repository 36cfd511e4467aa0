//! Fan-out of ingested records to every sink queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cdc_config::shared::FanoutPolicy;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::concurrency::queue::{QueueRx, QueueTx, TrySendError};
use crate::error::CdcResult;
use crate::metrics::{
    CDC_DISPATCHER_DROPPED_TOTAL, CDC_DISPATCHER_EVICTED_TOTAL, CDC_DISPATCHER_RECORDS_TOTAL,
    REASON_LABEL, SINK_LABEL,
};
use crate::types::Record;

/// Counters of the dispatcher.
#[derive(Debug, Default)]
pub struct DispatcherStats {
    dispatched: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStatsSnapshot {
    /// Records read from the ingestion queue.
    pub dispatched: u64,
    /// Per-sink offers that were not accepted.
    pub dropped: u64,
    /// Queued records evicted under [`FanoutPolicy::DropOldest`].
    pub evicted: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// The sending side of one sink queue as seen by the dispatcher.
#[derive(Debug)]
pub struct SinkOutput {
    name: String,
    tx: QueueTx,
    /// Receiver used to evict the oldest record; only held for [`FanoutPolicy::DropOldest`].
    evict_rx: Option<QueueRx>,
}

impl SinkOutput {
    pub fn new(name: impl Into<String>, tx: QueueTx, rx: &QueueRx, policy: FanoutPolicy) -> Self {
        let evict_rx = (policy == FanoutPolicy::DropOldest).then(|| rx.clone());

        Self {
            name: name.into(),
            tx,
            evict_rx,
        }
    }
}

/// Reads each record once from the ingestion queue and offers it to every sink queue, in the
/// order the sinks were configured.
#[derive(Debug)]
pub struct Dispatcher {
    ingestion: QueueRx,
    outputs: Vec<SinkOutput>,
    policy: FanoutPolicy,
    stats: Arc<DispatcherStats>,
}

impl Dispatcher {
    pub fn new(
        ingestion: QueueRx,
        outputs: Vec<SinkOutput>,
        policy: FanoutPolicy,
        stats: Arc<DispatcherStats>,
    ) -> Self {
        Self {
            ingestion,
            outputs,
            policy,
            stats,
        }
    }

    /// Runs until the ingestion queue is closed and drained.
    ///
    /// Returning drops every sink queue sender, which closes the sink queues once drained.
    pub async fn run(self) -> CdcResult<()> {
        info!(
            sinks = self.outputs.len(),
            policy = ?self.policy,
            "starting dispatcher"
        );

        while let Some(record) = self.ingestion.recv().await {
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            counter!(CDC_DISPATCHER_RECORDS_TOTAL).increment(1);

            self.dispatch(record).await;
        }

        info!("ingestion queue drained, dispatcher stopping");

        Ok(())
    }

    async fn dispatch(&self, record: Record) {
        let Some((last, rest)) = self.outputs.split_last() else {
            return;
        };

        for output in rest {
            self.offer(output, record.clone()).await;
        }
        self.offer(last, record).await;
    }

    async fn offer(&self, output: &SinkOutput, record: Record) {
        match self.policy {
            FanoutPolicy::Blocking => {
                if let Err(err) = output.tx.send(record).await {
                    warn!(sink = %output.name, error = %err, "sink queue closed, record dropped");
                    self.record_drop(output, "closed");
                }
            }
            FanoutPolicy::Independent => match output.tx.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(record)) => {
                    warn!(
                        sink = %output.name,
                        id = %record.id,
                        "sink queue full, record dropped for this sink"
                    );
                    self.record_drop(output, "full");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(sink = %output.name, "sink queue closed, record dropped");
                    self.record_drop(output, "closed");
                }
            },
            FanoutPolicy::DropOldest => self.offer_evicting(output, record),
        }
    }

    fn offer_evicting(&self, output: &SinkOutput, mut record: Record) {
        loop {
            match output.tx.try_send(record) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    record = rejected;

                    // Workers may have drained the queue meanwhile; the retry handles that.
                    if let Some(evicted) = output.evict_rx.as_ref().and_then(QueueRx::try_recv) {
                        debug!(
                            sink = %output.name,
                            evicted_id = %evicted.id,
                            evicted_entry_time = %evicted.entry_time,
                            "sink queue full, oldest record evicted"
                        );
                        self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                        counter!(CDC_DISPATCHER_EVICTED_TOTAL, SINK_LABEL => output.name.clone())
                            .increment(1);
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(sink = %output.name, "sink queue closed, record dropped");
                    self.record_drop(output, "closed");
                    return;
                }
            }
        }
    }

    fn record_drop(&self, output: &SinkOutput, reason: &'static str) {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        counter!(
            CDC_DISPATCHER_DROPPED_TOTAL,
            SINK_LABEL => output.name.clone(),
            REASON_LABEL => reason
        )
        .increment(1);
    }
}
