use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{PipelineConfig, SinkConfig, SourceConfig, ValidationError};

/// Complete configuration for the replicator service.
///
/// This intentionally does not implement [`Serialize`] to avoid accidentally
/// leaking secrets in the config into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Sinks in fan-out order.
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ReplicatorConfig {
    /// Validates every component and the relations between sinks.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.pipeline.validate()?;

        if self.sinks.is_empty() {
            return Err(ValidationError::NoSinks);
        }

        let mut names = HashSet::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            sink.validate()?;
            if !names.insert(sink.name.as_str()) {
                return Err(ValidationError::DuplicateSinkName(sink.name.clone()));
            }
        }

        Ok(())
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// HTTP liveness endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl HealthConfig {
    pub const DEFAULT_PORT: u16 = 8080;
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            port: default_health_port(),
        }
    }
}

fn default_health_port() -> u16 {
    HealthConfig::DEFAULT_PORT
}

/// Prometheus exporter settings; no exporter is started without a port.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub port: Option<u16>,
}
