use std::future::Future;
use std::sync::Arc;

use crate::concurrency::queue::QueueTx;
use crate::concurrency::scope::TaskScope;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::CdcResult;

/// Turns an external feed into records on the ingestion queue.
///
/// A source owns its connection and is the only stage observing the shutdown signal. Once it
/// stops, every clone of the ingestion sender it was given must be dropped so the queue closes.
pub trait Source: Send + Sync + 'static {
    /// Returns the kind of the source, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Connects to the feed. Called once during pipeline startup, before any queue exists.
    fn connect(&self) -> impl Future<Output = CdcResult<()>> + Send;

    /// Spawns the tasks producing records into `ingestion` until shutdown is signalled.
    fn start(
        self: Arc<Self>,
        ingestion: QueueTx,
        shutdown_rx: ShutdownRx,
        scope: &mut TaskScope,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    /// Closes the connection. Called after every sink was shut down.
    fn close(&self) -> impl Future<Output = CdcResult<()>> + Send {
        async { Ok(()) }
    }
}
