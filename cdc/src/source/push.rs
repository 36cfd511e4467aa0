use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cdc_config::shared::AdmissionPolicy;
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bail;
use crate::concurrency::queue::{QueueRx, QueueTx, create_queue};
use crate::concurrency::scope::TaskScope;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CdcResult, ErrorKind};
use crate::metrics::{
    CDC_SOURCE_MESSAGES_ACKED_TOTAL, CDC_SOURCE_MESSAGES_RECEIVED_TOTAL,
    CDC_SOURCE_RECORDS_DROPPED_TOTAL, CDC_SOURCE_RECORDS_ENQUEUED_TOTAL, REASON_LABEL,
    SOURCE_LABEL,
};
use crate::source::Source;
use crate::source::broker::{Broker, InboundMessage, Subscription};
use crate::types::Record;

const SOURCE_KIND: &str = "push";

#[derive(Debug, Default)]
pub struct PushSourceStats {
    received: AtomicU64,
    acked: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSourceStatsSnapshot {
    pub received: u64,
    pub acked: u64,
    pub enqueued: u64,
    /// Messages acknowledged but never enqueued, either undecodable or rejected on admission.
    pub dropped: u64,
}

impl PushSourceStats {
    pub fn snapshot(&self) -> PushSourceStatsSnapshot {
        PushSourceStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn record_drop(&self, reason: &'static str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        counter!(
            CDC_SOURCE_RECORDS_DROPPED_TOTAL,
            SOURCE_LABEL => SOURCE_KIND,
            REASON_LABEL => reason
        )
        .increment(1);
    }
}

/// Source fed by a broker subscription.
///
/// One receive loop owns the subscription and hands messages to a fixed pool of handlers, which
/// decode them and admit the records into the ingestion queue. Handlers run concurrently, so
/// records may be enqueued in a different order than the broker delivered them.
///
/// A message is acknowledged before its record is admitted. A crash between the two loses the
/// message even though the broker considers it delivered.
pub struct PushSource<B: Broker> {
    broker: B,
    topic: String,
    workers: usize,
    subscription: Mutex<Option<B::Subscription>>,
    stats: Arc<PushSourceStats>,
}

impl<B: Broker> PushSource<B> {
    pub fn new(broker: B, topic: impl Into<String>, workers: usize) -> Self {
        Self {
            broker,
            topic: topic.into(),
            workers: workers.max(1),
            subscription: Mutex::new(None),
            stats: Arc::new(PushSourceStats::default()),
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn stats(&self) -> PushSourceStatsSnapshot {
        self.stats.snapshot()
    }
}

impl<B: Broker> Source for PushSource<B> {
    fn name(&self) -> &'static str {
        SOURCE_KIND
    }

    async fn connect(&self) -> CdcResult<()> {
        self.broker.connect().await?;
        let subscription = self.broker.subscribe(&self.topic).await?;
        *self.subscription.lock().await = Some(subscription);

        info!(topic = %self.topic, workers = self.workers, "push source subscribed");

        Ok(())
    }

    async fn start(
        self: Arc<Self>,
        ingestion: QueueTx,
        shutdown_rx: ShutdownRx,
        scope: &mut TaskScope,
    ) -> CdcResult<()> {
        let Some(subscription) = self.subscription.lock().await.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Push source started without a subscription",
                self.topic.clone()
            );
        };

        let (handoff_tx, handoff_rx) =
            create_queue::<InboundMessage>("push-handoff", self.workers, AdmissionPolicy::Block);

        for worker_id in 0..self.workers {
            scope.spawn(
                format!("source:push:handler:{worker_id}"),
                handle_messages(handoff_rx.clone(), ingestion.clone(), self.stats.clone()),
            );
        }

        scope.spawn(
            "source:push:receiver",
            receive_messages(
                subscription,
                handoff_tx,
                shutdown_rx,
                self.stats.clone(),
                self.topic.clone(),
            ),
        );

        Ok(())
    }

    async fn close(&self) -> CdcResult<()> {
        self.broker.disconnect().await
    }
}

/// Moves messages from the subscription to the handlers until shutdown or the end of the
/// subscription. Dropping the hand-off sender on return lets the handlers drain and stop.
async fn receive_messages<S: Subscription>(
    mut subscription: S,
    handoff: QueueTx<InboundMessage>,
    mut shutdown_rx: ShutdownRx,
    stats: Arc<PushSourceStats>,
    topic: String,
) -> CdcResult<()> {
    loop {
        let message = tokio::select! {
            biased;

            _ = shutdown_rx.wait_for_shutdown() => {
                info!(topic = %topic, "shutdown signalled, push source stops receiving");
                break;
            }
            message = subscription.next_message() => message,
        };

        let Some(message) = message else {
            info!(topic = %topic, "subscription ended");
            break;
        };

        stats.received.fetch_add(1, Ordering::Relaxed);
        counter!(CDC_SOURCE_MESSAGES_RECEIVED_TOTAL, SOURCE_LABEL => SOURCE_KIND).increment(1);

        // A message read from the subscription is always handed off, shutdown is only checked
        // before reading the next one.
        if handoff.send(message).await.is_err() {
            warn!(topic = %topic, "push handlers are gone, stopping receiver");
            break;
        }
    }

    if let Err(err) = subscription.unsubscribe().await {
        warn!(topic = %topic, error = %err, "failed to unsubscribe");
    }

    Ok(())
}

async fn handle_messages(
    handoff: QueueRx<InboundMessage>,
    ingestion: QueueTx,
    stats: Arc<PushSourceStats>,
) -> CdcResult<()> {
    while let Some(message) = handoff.recv().await {
        let payload = message.ack();
        stats.acked.fetch_add(1, Ordering::Relaxed);
        counter!(CDC_SOURCE_MESSAGES_ACKED_TOTAL, SOURCE_LABEL => SOURCE_KIND).increment(1);

        let record = match Record::decode(&payload) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, payload_len = payload.len(), "failed to decode message, dropping it");
                stats.record_drop("decode");
                continue;
            }
        };

        debug!(id = %record.id, entry_time = %record.entry_time, "admitting record");
        let id = record.id.clone();
        match ingestion.admit(record).await {
            Ok(()) => {
                stats.enqueued.fetch_add(1, Ordering::Relaxed);
                counter!(CDC_SOURCE_RECORDS_ENQUEUED_TOTAL, SOURCE_LABEL => SOURCE_KIND)
                    .increment(1);
            }
            Err(err) => {
                warn!(id = %id, error = %err, "record not admitted, dropping it");
                stats.record_drop("rejected");
            }
        }
    }

    Ok(())
}
