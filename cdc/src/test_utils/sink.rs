use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, watch};

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::sink::Sink;
use crate::test_utils::notify::TimedNotify;
use crate::types::Record;

type RecordCondition = Box<dyn Fn(&[Record]) -> bool + Send + Sync>;

struct Inner {
    records: Vec<Record>,
    conditions: Vec<(RecordCondition, Arc<Notify>)>,
    connect_called: bool,
    shutdown_called: bool,
}

impl Inner {
    fn check_conditions(&mut self) {
        let records = &self.records;
        self.conditions.retain(|(condition, notify)| {
            let satisfied = condition(records);
            if satisfied {
                notify.notify_one();
            }
            !satisfied
        });
    }
}

/// Wraps a sink and records every record it successfully wrote.
///
/// Tests can wait for conditions over the written records through [`TimedNotify`].
pub struct TestSinkWrapper<S> {
    wrapped: Arc<S>,
    inner: Arc<Mutex<Inner>>,
}

impl<S> Clone for TestSinkWrapper<S> {
    fn clone(&self) -> Self {
        Self {
            wrapped: self.wrapped.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<S> TestSinkWrapper<S> {
    pub fn wrap(sink: S) -> Self {
        Self {
            wrapped: Arc::new(sink),
            inner: Arc::new(Mutex::new(Inner {
                records: Vec::new(),
                conditions: Vec::new(),
                connect_called: false,
                shutdown_called: false,
            })),
        }
    }

    pub fn wrapped(&self) -> &S {
        &self.wrapped
    }

    pub async fn records(&self) -> Vec<Record> {
        self.inner.lock().await.records.clone()
    }

    pub async fn connect_called(&self) -> bool {
        self.inner.lock().await.connect_called
    }

    pub async fn shutdown_called(&self) -> bool {
        self.inner.lock().await.shutdown_called
    }

    /// Registers a notification fired once the written records satisfy `condition`.
    pub async fn notify_on_records<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[Record]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        inner.conditions.push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        TimedNotify::new(notify)
    }

    /// Registers a notification fired once at least `count` records were written.
    pub async fn wait_for_records(&self, count: usize) -> TimedNotify {
        self.notify_on_records(move |records| records.len() >= count)
            .await
    }
}

#[async_trait]
impl<S: Sink> Sink for TestSinkWrapper<S> {
    fn name(&self) -> &'static str {
        self.wrapped.name()
    }

    async fn connect(&self) -> CdcResult<()> {
        self.inner.lock().await.connect_called = true;
        self.wrapped.connect().await
    }

    async fn write(&self, record: &Record) -> CdcResult<()> {
        self.wrapped.write(record).await?;

        let mut inner = self.inner.lock().await;
        inner.records.push(record.clone());
        inner.check_conditions();

        Ok(())
    }

    async fn shutdown(&self) -> CdcResult<()> {
        self.inner.lock().await.shutdown_called = true;
        self.wrapped.shutdown().await
    }
}

/// Sink whose writes wait until it is unblocked.
#[derive(Debug, Clone)]
pub struct BlockingSink {
    unblocked_tx: Arc<watch::Sender<bool>>,
    entered: Arc<AtomicU64>,
    entered_notify: Arc<Notify>,
}

impl BlockingSink {
    /// Creates a sink that starts blocked.
    pub fn new() -> Self {
        let (unblocked_tx, _) = watch::channel(false);

        Self {
            unblocked_tx: Arc::new(unblocked_tx),
            entered: Arc::new(AtomicU64::new(0)),
            entered_notify: Arc::new(Notify::new()),
        }
    }

    /// Lets every pending and future write through.
    pub fn unblock(&self) {
        self.unblocked_tx.send_replace(true);
    }

    /// Number of writes that started, blocked or not.
    pub fn writes_entered(&self) -> u64 {
        self.entered.load(Ordering::SeqCst)
    }

    /// Returns a notification fired when the next write starts.
    pub fn write_entered(&self) -> TimedNotify {
        TimedNotify::new(self.entered_notify.clone())
    }
}

impl Default for BlockingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for BlockingSink {
    fn name(&self) -> &'static str {
        "blocking"
    }

    async fn write(&self, _record: &Record) -> CdcResult<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.entered_notify.notify_one();

        let mut unblocked_rx = self.unblocked_tx.subscribe();
        let _ = unblocked_rx.wait_for(|unblocked| *unblocked).await;

        Ok(())
    }
}

/// Sink failing the operations it was told to fail.
#[derive(Debug, Clone, Default)]
pub struct FailingSink {
    fail_connect: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_shutdown: Arc<AtomicBool>,
    write_attempts: Arc<AtomicU64>,
    shutdown_called: Arc<AtomicBool>,
}

impl FailingSink {
    pub fn failing_connect() -> Self {
        let sink = Self::default();
        sink.fail_connect.store(true, Ordering::SeqCst);
        sink
    }

    pub fn failing_writes() -> Self {
        let sink = Self::default();
        sink.fail_writes.store(true, Ordering::SeqCst);
        sink
    }

    pub fn failing_shutdown() -> Self {
        let sink = Self::default();
        sink.fail_shutdown.store(true, Ordering::SeqCst);
        sink
    }

    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn shutdown_called(&self) -> bool {
        self.shutdown_called.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn connect(&self) -> CdcResult<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            bail!(ErrorKind::SinkConnectionFailed, "Injected connect failure");
        }

        Ok(())
    }

    async fn write(&self, record: &Record) -> CdcResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!(
                ErrorKind::SinkWriteFailed,
                "Injected write failure",
                record.id.clone()
            );
        }

        Ok(())
    }

    async fn shutdown(&self) -> CdcResult<()> {
        self.shutdown_called.store(true, Ordering::SeqCst);
        if self.fail_shutdown.load(Ordering::SeqCst) {
            bail!(ErrorKind::SinkError, "Injected shutdown failure");
        }

        Ok(())
    }
}
