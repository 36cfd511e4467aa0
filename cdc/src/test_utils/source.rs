use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::bail;
use crate::concurrency::queue::QueueTx;
use crate::concurrency::scope::TaskScope;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CdcResult, ErrorKind};
use crate::source::Source;
use crate::types::Record;

#[derive(Debug, Default)]
struct Inner {
    ingestion: Mutex<Option<QueueTx>>,
    fail_connect: AtomicBool,
    fail_start: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
}

/// Source driven by the test through [`ManualSourceHandle::admit`].
///
/// On shutdown it releases the ingestion queue, after which every admit fails.
#[derive(Debug, Default)]
pub struct ManualSource {
    inner: Arc<Inner>,
}

/// Test side of a [`ManualSource`].
#[derive(Debug, Clone)]
pub struct ManualSourceHandle {
    inner: Arc<Inner>,
}

impl ManualSource {
    pub fn new() -> (Self, ManualSourceHandle) {
        let source = Self::default();
        let handle = ManualSourceHandle {
            inner: source.inner.clone(),
        };

        (source, handle)
    }

    pub fn fail_connect(self) -> Self {
        self.inner.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_start(self) -> Self {
        self.inner.fail_start.store(true, Ordering::SeqCst);
        self
    }
}

impl ManualSourceHandle {
    /// Admits a record into the ingestion queue as a real source would.
    pub async fn admit(&self, record: Record) -> CdcResult<()> {
        let Some(ingestion) = self.inner.ingestion.lock().await.clone() else {
            bail!(
                ErrorKind::InvalidState,
                "Manual source is not running"
            );
        };

        ingestion.admit(record).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Source for ManualSource {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn connect(&self) -> CdcResult<()> {
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Injected source connect failure"
            );
        }

        self.inner.connected.store(true, Ordering::SeqCst);

        Ok(())
    }

    async fn start(
        self: Arc<Self>,
        ingestion: QueueTx,
        mut shutdown_rx: ShutdownRx,
        scope: &mut TaskScope,
    ) -> CdcResult<()> {
        if self.inner.fail_start.load(Ordering::SeqCst) {
            bail!(ErrorKind::SourceError, "Injected source start failure");
        }

        *self.inner.ingestion.lock().await = Some(ingestion);

        let inner = self.inner.clone();
        scope.spawn("source:manual", async move {
            shutdown_rx.wait_for_shutdown().await;
            inner.ingestion.lock().await.take();

            Ok(())
        });

        Ok(())
    }

    async fn close(&self) -> CdcResult<()> {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.closed.store(true, Ordering::SeqCst);

        Ok(())
    }
}
