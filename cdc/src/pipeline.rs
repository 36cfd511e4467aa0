use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cdc_config::shared::{AdmissionPolicy, PipelineConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bail;
use crate::concurrency::queue::create_queue;
use crate::concurrency::scope::TaskScope;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::dispatcher::{Dispatcher, DispatcherStats, DispatcherStatsSnapshot, SinkOutput};
use crate::error::{CdcResult, ErrorKind};
use crate::sink::{BoxedSink, SinkSpec};
use crate::source::Source;
use crate::workers::{SinkStats, SinkStatsSnapshot, SinkWorkerPool};

/// Externally visible lifecycle of a [`Pipeline`].
///
/// `Stopped` is terminal; a stopped pipeline cannot be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started { scope: TaskScope },
    Finished,
}

/// Moves records from one source to any number of sinks.
///
/// Startup connects every sink, then the source, then spawns the worker pools, the dispatcher
/// and finally the source tasks. Shutdown only stops the source; the dispatcher and the worker
/// pools stop once their input queues are closed and drained, so every admitted record is
/// offered to every sink before [`Pipeline::wait`] returns.
pub struct Pipeline<S> {
    config: PipelineConfig,
    source: Arc<S>,
    sinks: Vec<SinkSpec>,
    state: PipelineState,
    status_tx: watch::Sender<PipelineStatus>,
    shutdown_tx: ShutdownTx,
    sink_stats: HashMap<String, Arc<SinkStats>>,
    dispatcher_stats: Arc<DispatcherStats>,
}

impl<S: Source> Pipeline<S> {
    pub fn new(config: PipelineConfig, source: S, sinks: Vec<SinkSpec>) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();
        let (status_tx, _) = watch::channel(PipelineStatus::Idle);

        Self {
            config,
            source: Arc::new(source),
            sinks,
            state: PipelineState::NotStarted,
            status_tx,
            shutdown_tx,
            sink_stats: HashMap::new(),
            dispatcher_stats: Arc::new(DispatcherStats::default()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status_tx.borrow()
    }

    pub fn status_rx(&self) -> watch::Receiver<PipelineStatus> {
        self.status_tx.subscribe()
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Returns the delivery counters of the sink called `name`, once the pipeline was started.
    pub fn sink_stats(&self, name: &str) -> Option<SinkStatsSnapshot> {
        self.sink_stats.get(name).map(|stats| stats.snapshot())
    }

    pub fn dispatcher_stats(&self) -> DispatcherStatsSnapshot {
        self.dispatcher_stats.snapshot()
    }

    pub async fn start(&mut self) -> CdcResult<()> {
        if !matches!(self.state, PipelineState::NotStarted) {
            bail!(
                ErrorKind::InvalidState,
                "Pipeline can only be started once",
                format!("current status is {:?}", self.status())
            );
        }

        if let Err(err) = self.validate_sinks() {
            self.finish();
            return Err(err);
        }

        self.set_status(PipelineStatus::Starting);
        info!(
            source = self.source.name(),
            sinks = self.sinks.len(),
            fanout = ?self.config.fanout,
            "starting pipeline"
        );

        let connected = match connect_sinks(&self.sinks).await {
            Ok(connected) => connected,
            Err(err) => {
                self.finish();
                return Err(err);
            }
        };

        if let Err(err) = self.source.connect().await {
            error!(source = self.source.name(), error = %err, "failed to connect source");
            shutdown_sinks(&connected).await;
            self.close_source().await;
            self.finish();

            return Err(err);
        }

        let (ingestion_tx, ingestion_rx) = create_queue(
            "ingestion",
            self.config.ingestion_queue.capacity,
            self.config.ingestion_queue.admission,
        );

        let mut scope = TaskScope::new();
        let mut outputs = Vec::with_capacity(self.sinks.len());
        for spec in &self.sinks {
            // Workers are the only consumers of a sink queue, so the dispatcher always blocks
            // on it and applies the fan-out policy itself.
            let (tx, rx) = create_queue(
                spec.name.as_str(),
                spec.queue_capacity,
                AdmissionPolicy::Block,
            );
            outputs.push(SinkOutput::new(spec.name.clone(), tx, &rx, self.config.fanout));

            let stats = Arc::new(SinkStats::default());
            self.sink_stats.insert(spec.name.clone(), stats.clone());
            SinkWorkerPool::new(spec, rx, stats).spawn(&mut scope);
        }

        let dispatcher = Dispatcher::new(
            ingestion_rx,
            outputs,
            self.config.fanout,
            self.dispatcher_stats.clone(),
        );
        scope.spawn("dispatcher", dispatcher.run());

        if let Err(err) = self
            .source
            .clone()
            .start(ingestion_tx, self.shutdown_tx.subscribe(), &mut scope)
            .await
        {
            error!(source = self.source.name(), error = %err, "failed to start source");

            // Whatever the source spawned stops on the signal; the rest drains behind it.
            self.shutdown_tx.shutdown();
            if let Err(join_err) = scope.join_all().await {
                warn!(error = %join_err, "pipeline tasks failed while aborting startup");
            }
            shutdown_sinks(&connected).await;
            self.close_source().await;
            self.finish();

            return Err(err);
        }

        self.state = PipelineState::Started { scope };
        self.set_status(PipelineStatus::Running);
        info!("pipeline running");

        Ok(())
    }

    /// Waits until every pipeline task finished, then closes the sinks and the source.
    ///
    /// Returns the errors of every failed task. Failures while closing connections are only
    /// logged.
    pub async fn wait(&mut self) -> CdcResult<()> {
        let PipelineState::Started { scope } =
            std::mem::replace(&mut self.state, PipelineState::Finished)
        else {
            info!("pipeline was not started, nothing to wait for");
            if self.status() == PipelineStatus::Idle {
                self.state = PipelineState::NotStarted;
            }

            return Ok(());
        };

        info!(tasks = scope.len(), "waiting for pipeline tasks to complete");
        let result = scope.join_all().await;

        self.set_status(PipelineStatus::Stopping);

        let sinks: Vec<BoxedSink> = self
            .sinks
            .iter()
            .flat_map(|spec| std::iter::once(spec.sink.clone()).chain(spec.dead_letter.clone()))
            .collect();
        shutdown_sinks(&sinks).await;
        self.close_source().await;

        self.set_status(PipelineStatus::Stopped);

        match &result {
            Ok(()) => info!("pipeline stopped"),
            Err(err) => error!(error = %err, "pipeline stopped with errors"),
        }

        result
    }

    /// Signals the source to stop admitting records. Does not wait; see [`Pipeline::wait`].
    pub fn shutdown(&self) {
        info!("shutting down the pipeline");

        self.shutdown_tx.shutdown();
        self.status_tx.send_if_modified(|status| {
            if *status == PipelineStatus::Running {
                *status = PipelineStatus::Stopping;
                true
            } else {
                false
            }
        });
    }

    pub async fn shutdown_and_wait(&mut self) -> CdcResult<()> {
        self.shutdown();
        self.wait().await
    }

    fn validate_sinks(&self) -> CdcResult<()> {
        if self.sinks.is_empty() {
            bail!(ErrorKind::ConfigError, "Pipeline has no sinks");
        }

        let mut names = HashSet::new();
        for spec in &self.sinks {
            if !names.insert(spec.name.as_str()) {
                bail!(
                    ErrorKind::ConfigError,
                    "Duplicate sink name",
                    spec.name.clone()
                );
            }
        }

        Ok(())
    }

    async fn close_source(&self) {
        if let Err(err) = self.source.close().await {
            warn!(source = self.source.name(), error = %err, "failed to close source");
        }
    }

    fn finish(&mut self) {
        self.state = PipelineState::Finished;
        self.set_status(PipelineStatus::Stopped);
    }

    fn set_status(&self, status: PipelineStatus) {
        self.status_tx.send_replace(status);
    }
}

/// Connects every sink and dead-letter sink in order.
///
/// On failure the sinks connected so far are shut down again before the error is returned.
async fn connect_sinks(specs: &[SinkSpec]) -> CdcResult<Vec<BoxedSink>> {
    let mut connected: Vec<BoxedSink> = Vec::new();
    for spec in specs {
        for sink in std::iter::once(&spec.sink).chain(spec.dead_letter.iter()) {
            if let Err(err) = sink.connect().await {
                error!(sink = %spec.name, kind = sink.name(), error = %err, "failed to connect sink");
                shutdown_sinks(&connected).await;

                return Err(err);
            }

            connected.push(sink.clone());
        }
    }

    Ok(connected)
}

/// Shuts down every sink, logging failures.
async fn shutdown_sinks(sinks: &[BoxedSink]) {
    for sink in sinks {
        if let Err(err) = sink.shutdown().await {
            warn!(kind = sink.name(), error = %err, "failed to shut down sink");
        }
    }
}
