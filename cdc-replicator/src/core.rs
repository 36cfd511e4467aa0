use std::sync::Arc;

use cdc::error::CdcResult;
use cdc::pipeline::Pipeline;
use cdc::sink::alert::ThresholdAlertSink;
use cdc::sink::postgres::PostgresSink;
use cdc::sink::{BoxedSink, SinkSpec};
use cdc::source::broker::PgBroker;
use cdc::source::change_log::PgChangeLog;
use cdc::source::{PollSource, PushSource, Source};
use cdc_config::shared::{
    PgConnectionConfig, PipelineConfig, ReplicatorConfig, SinkConfig, SinkKind, SourceConfig,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{debug, error, info};

use crate::error::ReplicatorResult;
use crate::health::start_health_server;
use crate::signal::TerminationSignals;

/// Runs the replicator until a termination signal arrives or the pipeline fails.
///
/// The health server runs next to the pipeline and is stopped once the pipeline has stopped.
pub async fn start_replicator_with_config(
    replicator_config: ReplicatorConfig,
    metrics_handle: Option<PrometheusHandle>,
) -> ReplicatorResult<()> {
    info!("starting replicator service");

    log_config(&replicator_config);

    let signals = TerminationSignals::register()?;
    let server = start_health_server(replicator_config.health.port, metrics_handle)?;
    let server_handle = server.handle();

    let run_pipeline = async move {
        let result = run_pipeline_with_config(replicator_config, signals).await;
        server_handle.stop(true).await;
        result
    };

    let (pipeline_result, server_result) = tokio::join!(run_pipeline, server);
    if let Err(err) = server_result {
        error!(error = %err, "health server failed");
    }
    pipeline_result?;

    info!("replicator service completed");

    Ok(())
}

/// Builds the configured source and runs the pipeline with it.
///
/// Each source kind is matched separately since the pipeline is generic over its source.
async fn run_pipeline_with_config(
    replicator_config: ReplicatorConfig,
    signals: TerminationSignals,
) -> CdcResult<()> {
    let sinks = build_sinks(&replicator_config.sinks);
    let pipeline_config = replicator_config.pipeline;

    match replicator_config.source {
        SourceConfig::Broker {
            connection,
            topic,
            workers,
        } => {
            let source = PushSource::new(PgBroker::new(connection), topic, workers);
            let pipeline = Pipeline::new(pipeline_config, source, sinks);
            start_pipeline(pipeline, signals).await
        }
        SourceConfig::ChangeLog {
            connection,
            table,
            poll,
        } => {
            let source = PollSource::new(PgChangeLog::new(connection, table), poll);
            let pipeline = Pipeline::new(pipeline_config, source, sinks);
            start_pipeline(pipeline, signals).await
        }
    }
}

fn build_sinks(configs: &[SinkConfig]) -> Vec<SinkSpec> {
    configs
        .iter()
        .map(|config| {
            let sink = build_sink(&config.kind);
            let dead_letter = config.dead_letter.as_ref().map(build_sink);

            SinkSpec::from_config(config, sink, dead_letter)
        })
        .collect()
}

fn build_sink(kind: &SinkKind) -> BoxedSink {
    match kind {
        SinkKind::Postgres { connection, table } => {
            Arc::new(PostgresSink::new(connection.clone(), table))
        }
        SinkKind::Alert {
            low_capacity_threshold,
        } => Arc::new(ThresholdAlertSink::new(*low_capacity_threshold)),
    }
}

/// Starts a pipeline and shuts it down on the first termination signal.
///
/// Records already admitted are drained to the sinks before this returns.
#[tracing::instrument(skip_all, fields(source = pipeline.source().name()))]
async fn start_pipeline<S: Source>(
    mut pipeline: Pipeline<S>,
    mut signals: TerminationSignals,
) -> CdcResult<()> {
    pipeline.start().await?;

    let shutdown_tx = pipeline.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        let signal = signals.recv().await;
        info!(signal, "termination signal received, shutting down pipeline");

        shutdown_tx.shutdown();
    });

    let result = pipeline.wait().await;

    // The pipeline may have stopped on its own, in which case no signal will ever arrive.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result
}

fn log_config(config: &ReplicatorConfig) {
    log_source_config(&config.source);
    log_pipeline_config(&config.pipeline);
    for sink in &config.sinks {
        log_sink_config(sink);
    }
    debug!(
        health_port = config.health.port,
        metrics_port = config.metrics.port,
        "service config"
    );
}

fn log_source_config(config: &SourceConfig) {
    match config {
        SourceConfig::Broker {
            connection,
            topic,
            workers,
        } => {
            debug!(topic, workers, "using broker source config");
            log_pg_connection_config("broker", connection);
        }
        SourceConfig::ChangeLog {
            connection,
            table,
            poll,
        } => {
            debug!(
                table,
                batch_size = poll.batch_size,
                confidence_window_ms = poll.confidence_window_ms,
                non_empty_delay_ms = poll.non_empty_delay_ms,
                empty_delay_ms = poll.empty_delay_ms,
                failure_delay_ms = poll.failure_delay_ms,
                lookback_ms = poll.lookback_ms,
                "using change log source config"
            );
            log_pg_connection_config("change_log", connection);
        }
    }
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        ingestion_capacity = config.ingestion_queue.capacity,
        admission = ?config.ingestion_queue.admission,
        fanout = ?config.fanout,
        "pipeline config"
    );
}

fn log_sink_config(config: &SinkConfig) {
    debug!(
        sink = config.name,
        kind = sink_kind_name(&config.kind),
        queue_capacity = config.queue_capacity,
        workers = config.workers,
        max_attempts = config.retry.max_attempts,
        write_timeout_ms = config.write_timeout_ms,
        dead_letter = config.dead_letter.as_ref().map(sink_kind_name),
        "sink config"
    );

    if let SinkKind::Postgres { connection, .. } = &config.kind {
        log_pg_connection_config(&config.name, connection);
    }
}

fn sink_kind_name(kind: &SinkKind) -> &'static str {
    match kind {
        SinkKind::Postgres { .. } => "postgres",
        SinkKind::Alert { .. } => "alert",
    }
}

fn log_pg_connection_config(owner: &str, config: &PgConnectionConfig) {
    debug!(
        owner,
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        max_connections = config.max_connections,
        "postgres connection config",
    );
}
