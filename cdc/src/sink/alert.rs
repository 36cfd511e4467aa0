use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use cdc_config::shared::SinkKind;
use metrics::counter;
use tracing::warn;

use crate::error::CdcResult;
use crate::metrics::CDC_ALERTS_EMITTED_TOTAL;
use crate::sink::Sink;
use crate::types::Record;

/// Emits a warning for every record whose capacity is strictly below a threshold.
///
/// Writes never fail. The alert is a structured `warn` event carrying the record's `id` and
/// `capacity`.
#[derive(Debug, Clone)]
pub struct ThresholdAlertSink {
    low_capacity_threshold: f32,
    alerts_emitted: Arc<AtomicU64>,
}

impl ThresholdAlertSink {
    pub fn new(low_capacity_threshold: f32) -> Self {
        Self {
            low_capacity_threshold,
            alerts_emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn low_capacity_threshold(&self) -> f32 {
        self.low_capacity_threshold
    }

    /// Number of alerts emitted so far, shared by every clone.
    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted.load(Ordering::Relaxed)
    }
}

impl Default for ThresholdAlertSink {
    fn default() -> Self {
        Self::new(SinkKind::DEFAULT_LOW_CAPACITY_THRESHOLD)
    }
}

#[async_trait]
impl Sink for ThresholdAlertSink {
    fn name(&self) -> &'static str {
        "alert"
    }

    async fn write(&self, record: &Record) -> CdcResult<()> {
        if record.capacity < self.low_capacity_threshold {
            warn!(
                id = %record.id,
                capacity = record.capacity,
                threshold = self.low_capacity_threshold,
                entry_time = %record.entry_time,
                "low battery capacity"
            );

            self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            counter!(CDC_ALERTS_EMITTED_TOTAL).increment(1);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record_with_capacity(capacity: f32) -> Record {
        Record {
            id: "vehicle-1".to_string(),
            entry_time: Utc::now(),
            voltage: 48.0,
            current: 1.0,
            capacity,
            power: 48,
            temperature: 20.0,
            soc: 50,
            internal_resistance: 0.1,
        }
    }

    #[tokio::test]
    async fn alerts_only_strictly_below_threshold() {
        let sink = ThresholdAlertSink::default();

        sink.write(&record_with_capacity(5.0)).await.unwrap();
        assert_eq!(sink.alerts_emitted(), 1);

        sink.write(&record_with_capacity(50.0)).await.unwrap();
        assert_eq!(sink.alerts_emitted(), 1);

        sink.write(&record_with_capacity(10.0)).await.unwrap();
        assert_eq!(sink.alerts_emitted(), 1);
    }

    #[tokio::test]
    async fn clones_share_the_alert_counter() {
        let sink = ThresholdAlertSink::new(20.0);
        let clone = sink.clone();

        clone.write(&record_with_capacity(19.5)).await.unwrap();
        assert_eq!(sink.alerts_emitted(), 1);
    }
}
