use std::time::Duration;

use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Bounded retry of failed sink writes.
///
/// The default of a single attempt means a failed write is logged and dropped.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt. Must be >= 1.0.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
    pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;
    pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

    /// Delay to wait before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }

    fn validate(&self, sink: &str) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::invalid(
                format!("sinks.{sink}.retry.max_attempts"),
                "must be greater than 0",
            ));
        }

        if self.backoff_factor < 1.0 {
            return Err(ValidationError::invalid(
                format!("sinks.{sink}.retry.backoff_factor"),
                "must be at least 1.0",
            ));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    RetryConfig::DEFAULT_MAX_ATTEMPTS
}

fn default_initial_delay_ms() -> u64 {
    RetryConfig::DEFAULT_INITIAL_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_DELAY_MS
}

fn default_backoff_factor() -> f64 {
    RetryConfig::DEFAULT_BACKOFF_FACTOR
}

/// The store or alerting target behind a sink.
///
/// This intentionally does not implement [`Serialize`](serde::Serialize) to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Inserts every record into a Postgres table.
    Postgres {
        connection: PgConnectionConfig,
        table: String,
    },
    /// Emits a warning for records whose capacity is below the threshold.
    Alert {
        #[serde(default = "default_low_capacity_threshold")]
        low_capacity_threshold: f32,
    },
}

impl SinkKind {
    pub const DEFAULT_LOW_CAPACITY_THRESHOLD: f32 = 10.0;

    fn validate(&self, field: &str) -> Result<(), ValidationError> {
        match self {
            SinkKind::Postgres { connection, table } => {
                connection.validate(&format!("{field}.connection"))?;
                if table.is_empty() {
                    return Err(ValidationError::invalid(
                        format!("{field}.table"),
                        "must not be empty",
                    ));
                }

                Ok(())
            }
            SinkKind::Alert { .. } => Ok(()),
        }
    }
}

fn default_low_capacity_threshold() -> f32 {
    SinkKind::DEFAULT_LOW_CAPACITY_THRESHOLD
}

const fn default_queue_capacity() -> usize {
    SinkConfig::DEFAULT_QUEUE_CAPACITY
}

const fn default_workers() -> usize {
    SinkConfig::DEFAULT_WORKERS
}

/// One downstream sink with its own queue and worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Unique name used in logs and metrics.
    pub name: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-write timeout; a timed out write counts as a failed attempt.
    #[serde(default)]
    pub write_timeout_ms: Option<u64>,
    /// Receives records whose retries are exhausted.
    #[serde(default)]
    pub dead_letter: Option<SinkKind>,
    pub kind: SinkKind,
}

impl SinkConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
    pub const DEFAULT_WORKERS: usize = 10;

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let name = &self.name;
        if name.is_empty() {
            return Err(ValidationError::invalid("sinks.name", "must not be empty"));
        }

        if self.queue_capacity == 0 {
            return Err(ValidationError::invalid(
                format!("sinks.{name}.queue_capacity"),
                "must be greater than 0",
            ));
        }

        if self.workers == 0 {
            return Err(ValidationError::invalid(
                format!("sinks.{name}.workers"),
                "must be greater than 0",
            ));
        }

        if self.write_timeout_ms == Some(0) {
            return Err(ValidationError::invalid(
                format!("sinks.{name}.write_timeout_ms"),
                "must be greater than 0",
            ));
        }

        self.retry.validate(name)?;
        self.kind.validate(&format!("sinks.{name}.kind"))?;
        if let Some(dead_letter) = &self.dead_letter {
            dead_letter.validate(&format!("sinks.{name}.dead_letter"))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert_sink() -> SinkConfig {
        serde_json::from_str(r#"{"name": "alerts", "kind": {"alert": {}}}"#).unwrap()
    }

    #[test]
    fn sink_defaults() {
        let sink = alert_sink();
        assert_eq!(sink.queue_capacity, 100);
        assert_eq!(sink.workers, 10);
        assert_eq!(sink.retry.max_attempts, 1);
        assert!(sink.write_timeout().is_none());
        assert!(sink.dead_letter.is_none());
        match sink.kind {
            SinkKind::Alert {
                low_capacity_threshold,
            } => assert_eq!(low_capacity_threshold, 10.0),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn in_process_memory_sink_is_not_configurable() {
        let result =
            serde_json::from_str::<SinkConfig>(r#"{"name": "replica", "kind": "memory"}"#);

        assert!(result.is_err());
    }

    #[test]
    fn retry_delay_grows_and_is_capped() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_factor: 2.0,
        };
        assert_eq!(retry.delay_after(1), Duration::from_millis(100));
        assert_eq!(retry.delay_after(2), Duration::from_millis(200));
        assert_eq!(retry.delay_after(3), Duration::from_millis(350));
    }

    #[test]
    fn invalid_retry_settings_are_rejected() {
        let mut sink = alert_sink();
        sink.retry.max_attempts = 0;
        assert!(sink.validate().is_err());

        let mut sink = alert_sink();
        sink.retry.backoff_factor = 0.5;
        assert_eq!(
            sink.validate().unwrap_err(),
            ValidationError::invalid("sinks.alerts.retry.backoff_factor", "must be at least 1.0")
        );
    }

    #[test]
    fn zero_workers_are_rejected() {
        let mut sink = alert_sink();
        sink.workers = 0;
        assert!(sink.validate().is_err());
    }
}
