use std::sync::Arc;
use std::time::Duration;

use cdc_config::shared::PollConfig;
use chrono::{DateTime, TimeDelta, Utc};
use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::concurrency::queue::QueueTx;
use crate::concurrency::scope::TaskScope;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CdcError, CdcResult};
use crate::metrics::{
    CDC_POLL_CYCLES_TOTAL, CDC_POLL_WATERMARK_SECONDS, CDC_SOURCE_RECORDS_DROPPED_TOTAL,
    CDC_SOURCE_RECORDS_ENQUEUED_TOTAL, OUTCOME_LABEL, REASON_LABEL, SOURCE_LABEL,
};
use crate::source::Source;
use crate::source::change_log::{ChangeLog, ChangeRow, PollWindow};
use crate::source::watermark::Watermark;
use crate::types::Record;

const SOURCE_KIND: &str = "poll";

/// Result of a single poll cycle.
#[derive(Debug)]
pub enum PollOutcome {
    /// A batch was processed and the watermark advanced to `watermark`.
    Rows {
        enqueued: usize,
        /// Rows that failed to decode. They count as processed.
        dropped: usize,
        /// Rows left for a later poll, either outside the window or sharing the batch's last
        /// logical time.
        deferred: usize,
        watermark: DateTime<Utc>,
    },
    /// Nothing to process; the watermark is unchanged.
    Empty,
    /// The query or an admission failed; the watermark is unchanged.
    Failed(CdcError),
}

impl PollOutcome {
    fn label(&self) -> &'static str {
        match self {
            PollOutcome::Rows { .. } => "rows",
            PollOutcome::Empty => "empty",
            PollOutcome::Failed(_) => "failed",
        }
    }
}

/// Source polling a change log with an advancing watermark.
///
/// Every cycle asks for rows in `(watermark, now - confidence_window]`, admits them in logical
/// time order and only then moves the watermark to the last processed row. If an admission
/// fails the watermark stays put and the next cycle fetches the same range again, so rows may
/// be delivered twice but never skipped.
#[derive(Debug)]
pub struct PollSource<C> {
    change_log: C,
    config: PollConfig,
    watermark: Watermark,
}

impl<C: ChangeLog> PollSource<C> {
    /// Creates a source starting at `now - lookback`.
    pub fn new(change_log: C, config: PollConfig) -> Self {
        let initial = Utc::now()
            .checked_sub_signed(to_time_delta(config.lookback()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self::with_watermark(change_log, config, initial)
    }

    pub fn with_watermark(change_log: C, config: PollConfig, watermark: DateTime<Utc>) -> Self {
        Self {
            change_log,
            config,
            watermark: Watermark::new(watermark),
        }
    }

    pub fn change_log(&self) -> &C {
        &self.change_log
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    /// Runs a single poll cycle against the current time.
    pub async fn poll_once(&self, ingestion: &QueueTx) -> PollOutcome {
        self.poll_once_at(ingestion, Utc::now()).await
    }

    /// Runs a single poll cycle as if the current time were `now`.
    pub async fn poll_once_at(&self, ingestion: &QueueTx, now: DateTime<Utc>) -> PollOutcome {
        let after = self.watermark.current();
        let until = now
            .checked_sub_signed(to_time_delta(self.config.confidence_window()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        if until <= after {
            debug!(%after, %until, "confidence window not yet past the watermark");
            return PollOutcome::Empty;
        }

        let window = PollWindow {
            after,
            until,
            limit: self.config.batch_size as usize,
        };

        let rows = match self.change_log.fetch(&window).await {
            Ok(rows) => rows,
            Err(err) => return PollOutcome::Failed(err),
        };
        if rows.is_empty() {
            return PollOutcome::Empty;
        }

        let batch_full = rows.len() >= window.limit;
        let (mut rows, mut deferred) = retain_window(rows, &window);
        rows.sort_by_key(|row| row.logical_time);

        if batch_full {
            deferred += hold_back_last_time(&mut rows);
        }

        let Some(last_time) = rows.last().map(|row| row.logical_time) else {
            return PollOutcome::Empty;
        };

        let mut enqueued = 0;
        let mut dropped = 0;
        for row in rows {
            let record = match Record::from_json(&row.payload) {
                Ok(record) => record,
                Err(err) => {
                    warn!(logical_time = %row.logical_time, error = %err, "failed to decode change log row, skipping it");
                    counter!(
                        CDC_SOURCE_RECORDS_DROPPED_TOTAL,
                        SOURCE_LABEL => SOURCE_KIND,
                        REASON_LABEL => "decode"
                    )
                    .increment(1);
                    dropped += 1;
                    continue;
                }
            };

            if let Err(err) = ingestion.admit(record).await {
                warn!(
                    logical_time = %row.logical_time,
                    enqueued,
                    error = %err,
                    "failed to admit change log row, batch will be polled again"
                );
                return PollOutcome::Failed(err);
            }

            enqueued += 1;
            counter!(CDC_SOURCE_RECORDS_ENQUEUED_TOTAL, SOURCE_LABEL => SOURCE_KIND).increment(1);
        }

        self.watermark.advance(last_time);
        gauge!(CDC_POLL_WATERMARK_SECONDS).set(last_time.timestamp() as f64);

        PollOutcome::Rows {
            enqueued,
            dropped,
            deferred,
            watermark: self.watermark.current(),
        }
    }

    fn delay_after(&self, outcome: &PollOutcome) -> Duration {
        match outcome {
            PollOutcome::Rows { .. } => self.config.non_empty_delay(),
            PollOutcome::Empty => self.config.empty_delay(),
            PollOutcome::Failed(_) => self.config.failure_delay(),
        }
    }

    async fn run(self: Arc<Self>, ingestion: QueueTx, mut shutdown_rx: ShutdownRx) -> CdcResult<()> {
        info!(watermark = %self.watermark.current(), "starting poll source");

        while !shutdown_rx.is_shutdown() {
            // A cycle in progress is not raced against shutdown, fetched rows are admitted first.
            let outcome = self.poll_once(&ingestion).await;
            counter!(CDC_POLL_CYCLES_TOTAL, OUTCOME_LABEL => outcome.label()).increment(1);

            match &outcome {
                PollOutcome::Rows {
                    enqueued,
                    dropped,
                    deferred,
                    watermark,
                } => {
                    debug!(enqueued, dropped, deferred, %watermark, "poll cycle processed rows");
                }
                PollOutcome::Empty => {}
                PollOutcome::Failed(err) => {
                    warn!(error = %err, "poll cycle failed");
                }
            }

            let delay = self.delay_after(&outcome);
            tokio::select! {
                biased;

                _ = shutdown_rx.wait_for_shutdown() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(watermark = %self.watermark.current(), "poll source stopped");

        Ok(())
    }
}

impl<C: ChangeLog> Source for PollSource<C> {
    fn name(&self) -> &'static str {
        SOURCE_KIND
    }

    async fn connect(&self) -> CdcResult<()> {
        self.change_log.connect().await
    }

    async fn start(
        self: Arc<Self>,
        ingestion: QueueTx,
        shutdown_rx: ShutdownRx,
        scope: &mut TaskScope,
    ) -> CdcResult<()> {
        scope.spawn("source:poll", self.run(ingestion, shutdown_rx));

        Ok(())
    }

    async fn close(&self) -> CdcResult<()> {
        self.change_log.close().await
    }
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Keeps rows inside the window, returning them with the number of rows deferred because they
/// are newer than the window.
fn retain_window(rows: Vec<ChangeRow>, window: &PollWindow) -> (Vec<ChangeRow>, usize) {
    let mut deferred = 0;
    let rows = rows
        .into_iter()
        .filter(|row| {
            if row.logical_time > window.until {
                deferred += 1;
                false
            } else if row.logical_time <= window.after {
                debug!(logical_time = %row.logical_time, "ignoring row at or before the watermark");
                false
            } else {
                true
            }
        })
        .collect();

    (rows, deferred)
}

/// Removes the trailing rows sharing the batch's last logical time, since more rows with that
/// time may lie beyond the limit. Returns how many rows were held back.
///
/// A batch made entirely of one logical time is kept whole, otherwise the poll could never
/// make progress.
fn hold_back_last_time(rows: &mut Vec<ChangeRow>) -> usize {
    let Some(last_time) = rows.last().map(|row| row.logical_time) else {
        return 0;
    };

    let tied = rows
        .iter()
        .rev()
        .take_while(|row| row.logical_time == last_time)
        .count();

    if tied == rows.len() {
        warn!(
            %last_time,
            rows = rows.len(),
            "every row of a full batch shares one logical time, rows beyond the batch size at that time may be skipped"
        );
        return 0;
    }

    rows.truncate(rows.len() - tied);
    tied
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn row(secs: i64) -> ChangeRow {
        ChangeRow {
            logical_time: Utc.timestamp_opt(secs, 0).unwrap(),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn ties_at_the_end_of_a_batch_are_held_back() {
        let mut rows = vec![row(1), row(2), row(3), row(3)];

        assert_eq!(hold_back_last_time(&mut rows), 2);
        assert_eq!(rows, vec![row(1), row(2)]);
    }

    #[test]
    fn single_time_batch_is_kept() {
        let mut rows = vec![row(7), row(7)];

        assert_eq!(hold_back_last_time(&mut rows), 0);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn rows_outside_the_window_are_not_kept() {
        let window = PollWindow {
            after: Utc.timestamp_opt(10, 0).unwrap(),
            until: Utc.timestamp_opt(20, 0).unwrap(),
            limit: 10,
        };

        let (rows, deferred) = retain_window(vec![row(5), row(10), row(15), row(20), row(25)], &window);

        assert_eq!(rows, vec![row(15), row(20)]);
        assert_eq!(deferred, 1);
    }
}
