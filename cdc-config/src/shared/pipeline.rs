use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// What a producer experiences when the ingestion queue is full.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Wait until the queue has room again.
    #[default]
    Block,
    /// Fail the admit call immediately.
    Reject,
}

/// How the dispatcher offers a record to the sink queues.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FanoutPolicy {
    /// Offer to each sink queue in order, waiting on every full queue.
    ///
    /// A persistently full sink queue stalls every later sink and finally the source.
    #[default]
    Blocking,
    /// Offer without waiting; a full sink queue loses the record for that sink only.
    Independent,
    /// Evict the oldest queued record of a full sink queue to make room for the new one.
    DropOldest,
}

/// Configuration of a bounded queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_ingestion_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub admission: AdmissionPolicy,
}

impl QueueConfig {
    pub const DEFAULT_CAPACITY: usize = 1_000;
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_ingestion_capacity(),
            admission: AdmissionPolicy::default(),
        }
    }
}

fn default_ingestion_capacity() -> usize {
    QueueConfig::DEFAULT_CAPACITY
}

/// Settings of the engine between source and sinks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub ingestion_queue: QueueConfig,
    #[serde(default)]
    pub fanout: FanoutPolicy,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ingestion_queue.capacity == 0 {
            return Err(ValidationError::invalid(
                "pipeline.ingestion_queue.capacity",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_block_on_admission_and_fan_out() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.ingestion_queue.capacity, QueueConfig::DEFAULT_CAPACITY);
        assert_eq!(config.ingestion_queue.admission, AdmissionPolicy::Block);
        assert_eq!(config.fanout, FanoutPolicy::Blocking);
    }

    #[test]
    fn parses_snake_case_policies() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"ingestion_queue": {"capacity": 8, "admission": "reject"}, "fanout": "drop_oldest"}"#,
        )
        .unwrap();
        assert_eq!(config.ingestion_queue.admission, AdmissionPolicy::Reject);
        assert_eq!(config.fanout, FanoutPolicy::DropOldest);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = PipelineConfig::default();
        config.ingestion_queue.capacity = 0;
        assert!(config.validate().is_err());
    }
}
