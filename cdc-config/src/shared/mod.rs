//! Shared configuration types for telemetry pipelines.

mod base;
mod connection;
mod pipeline;
mod replicator;
mod sink;
mod source;

pub use base::ValidationError;
pub use connection::{
    CDC_SINK_OPTIONS, CDC_SOURCE_OPTIONS, IntoConnectOptions, PgConnectionConfig,
    PgConnectionOptions, TlsConfig,
};
pub use pipeline::{AdmissionPolicy, FanoutPolicy, PipelineConfig, QueueConfig};
pub use replicator::{HealthConfig, MetricsConfig, ReplicatorConfig};
pub use sink::{RetryConfig, SinkConfig, SinkKind};
pub use source::{PollConfig, SourceConfig};
