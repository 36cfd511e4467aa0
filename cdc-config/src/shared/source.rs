use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{PgConnectionConfig, ValidationError};

/// Timing and sizing of the change-log poll loop.
///
/// Durations are stored in milliseconds for serialization compatibility.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PollConfig {
    /// Maximum number of rows fetched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Rows newer than `now - confidence_window` are left for a later poll.
    #[serde(default = "default_confidence_window_ms")]
    pub confidence_window_ms: u64,
    /// Delay after a poll that returned rows.
    #[serde(default = "default_non_empty_delay_ms")]
    pub non_empty_delay_ms: u64,
    /// Delay after a poll that returned nothing.
    #[serde(default = "default_empty_delay_ms")]
    pub empty_delay_ms: u64,
    /// Delay after a failed query or a failed enqueue.
    #[serde(default = "default_failure_delay_ms")]
    pub failure_delay_ms: u64,
    /// How far behind "now" the watermark starts.
    #[serde(default)]
    pub lookback_ms: u64,
}

impl PollConfig {
    pub const DEFAULT_BATCH_SIZE: u32 = 100;
    pub const DEFAULT_CONFIDENCE_WINDOW_MS: u64 = 5 * 60 * 1_000;
    pub const DEFAULT_NON_EMPTY_DELAY_MS: u64 = 10_000;
    pub const DEFAULT_EMPTY_DELAY_MS: u64 = 30_000;
    pub const DEFAULT_FAILURE_DELAY_MS: u64 = 1_000;

    pub fn confidence_window(&self) -> Duration {
        Duration::from_millis(self.confidence_window_ms)
    }

    pub fn non_empty_delay(&self) -> Duration {
        Duration::from_millis(self.non_empty_delay_ms)
    }

    pub fn empty_delay(&self) -> Duration {
        Duration::from_millis(self.empty_delay_ms)
    }

    pub fn failure_delay(&self) -> Duration {
        Duration::from_millis(self.failure_delay_ms)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_millis(self.lookback_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::invalid(
                "source.change_log.poll.batch_size",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            confidence_window_ms: default_confidence_window_ms(),
            non_empty_delay_ms: default_non_empty_delay_ms(),
            empty_delay_ms: default_empty_delay_ms(),
            failure_delay_ms: default_failure_delay_ms(),
            lookback_ms: 0,
        }
    }
}

fn default_batch_size() -> u32 {
    PollConfig::DEFAULT_BATCH_SIZE
}

fn default_confidence_window_ms() -> u64 {
    PollConfig::DEFAULT_CONFIDENCE_WINDOW_MS
}

fn default_non_empty_delay_ms() -> u64 {
    PollConfig::DEFAULT_NON_EMPTY_DELAY_MS
}

fn default_empty_delay_ms() -> u64 {
    PollConfig::DEFAULT_EMPTY_DELAY_MS
}

fn default_failure_delay_ms() -> u64 {
    PollConfig::DEFAULT_FAILURE_DELAY_MS
}

const fn default_subscriber_workers() -> usize {
    SourceConfig::DEFAULT_SUBSCRIBER_WORKERS
}

/// Where records enter the pipeline.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    /// Push ingestion from a Postgres `LISTEN/NOTIFY` channel.
    Broker {
        connection: PgConnectionConfig,
        /// Channel the broker publishes readings on.
        topic: String,
        /// Number of concurrent decode-and-enqueue workers.
        #[serde(default = "default_subscriber_workers")]
        workers: usize,
    },
    /// Pull ingestion by polling a table ordered by `entry_time`.
    ChangeLog {
        connection: PgConnectionConfig,
        table: String,
        #[serde(default)]
        poll: PollConfig,
    },
}

impl SourceConfig {
    pub const DEFAULT_SUBSCRIBER_WORKERS: usize = 5;

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SourceConfig::Broker {
                connection,
                topic,
                workers,
            } => {
                connection.validate("source.broker.connection")?;
                validate_topic(topic)?;
                validate_workers(*workers)
            }
            SourceConfig::ChangeLog {
                connection,
                table,
                poll,
            } => {
                connection.validate("source.change_log.connection")?;
                if table.is_empty() {
                    return Err(ValidationError::invalid(
                        "source.change_log.table",
                        "must not be empty",
                    ));
                }
                poll.validate()
            }
        }
    }
}

fn validate_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::invalid("source.topic", "must not be empty"));
    }

    Ok(())
}

fn validate_workers(workers: usize) -> Result<(), ValidationError> {
    if workers == 0 {
        return Err(ValidationError::invalid(
            "source.workers",
            "must be greater than 0",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_defaults_match_reader_settings() {
        let poll = PollConfig::default();
        assert_eq!(poll.batch_size, 100);
        assert_eq!(poll.confidence_window(), Duration::from_secs(300));
        assert_eq!(poll.non_empty_delay(), Duration::from_secs(10));
        assert_eq!(poll.empty_delay(), Duration::from_secs(30));
        assert_eq!(poll.failure_delay(), Duration::from_secs(1));
        assert_eq!(poll.lookback(), Duration::ZERO);
    }

    #[test]
    fn broker_source_defaults_to_five_workers() {
        let source: SourceConfig = serde_json::from_str(
            r#"{"broker": {
                "connection": {"host": "localhost", "port": 5432, "name": "db", "username": "u"},
                "topic": "vehicle_telemetry"
            }}"#,
        )
        .unwrap();
        match source {
            SourceConfig::Broker { workers, .. } => assert_eq!(workers, 5),
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn in_process_memory_source_is_not_configurable() {
        let result =
            serde_json::from_str::<SourceConfig>(r#"{"memory": {"topic": "vehicle/telemetry"}}"#);

        assert!(result.is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let source: SourceConfig = serde_json::from_str(
            r#"{"change_log": {
                "connection": {"host": "localhost", "port": 5432, "name": "db", "username": "u"},
                "table": "vehicle_data",
                "poll": {"batch_size": 0}
            }}"#,
        )
        .unwrap();

        assert_eq!(
            source.validate().unwrap_err(),
            ValidationError::invalid("source.change_log.poll.batch_size", "must be greater than 0")
        );
    }
}
