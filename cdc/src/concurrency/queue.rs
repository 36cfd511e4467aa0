//! Bounded queues between pipeline stages.
//!
//! A queue has a fixed capacity and is closed once every [`QueueTx`] is dropped. Receivers keep
//! draining buffered items after closure and only then observe the end of the queue.

use std::fmt;
use std::sync::Arc;

use cdc_config::shared::AdmissionPolicy;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::types::Record;

/// Outcome of a non-blocking send that could not be completed.
#[derive(Debug)]
pub enum TrySendError<T> {
    /// The queue is at capacity; the item is handed back.
    Full(T),
    /// Every receiver is gone; the item is handed back.
    Closed(T),
}

/// Sending half of a bounded queue.
pub struct QueueTx<T = Record> {
    name: Arc<str>,
    admission: AdmissionPolicy,
    inner: flume::Sender<T>,
}

impl<T> QueueTx<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admits an item according to the queue's [`AdmissionPolicy`].
    ///
    /// With [`AdmissionPolicy::Block`] the call waits while the queue is full. With
    /// [`AdmissionPolicy::Reject`] a full queue fails the call with [`ErrorKind::QueueFull`].
    pub async fn admit(&self, item: T) -> CdcResult<()> {
        match self.admission {
            AdmissionPolicy::Block => self.send(item).await,
            AdmissionPolicy::Reject => match self.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    bail!(
                        ErrorKind::QueueFull,
                        "Queue is full, item rejected",
                        self.name.to_string()
                    )
                }
                Err(TrySendError::Closed(_)) => {
                    bail!(
                        ErrorKind::QueueClosed,
                        "Queue is closed",
                        self.name.to_string()
                    )
                }
            },
        }
    }

    /// Sends an item, waiting while the queue is full.
    pub async fn send(&self, item: T) -> CdcResult<()> {
        if self.inner.send_async(item).await.is_err() {
            bail!(
                ErrorKind::QueueClosed,
                "Queue is closed",
                self.name.to_string()
            );
        }

        Ok(())
    }

    /// Sends an item only if there is room right now.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        self.inner.try_send(item).map_err(|err| match err {
            flume::TrySendError::Full(item) => TrySendError::Full(item),
            flume::TrySendError::Disconnected(item) => TrySendError::Closed(item),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity().unwrap_or(usize::MAX)
    }
}

impl<T> Clone for QueueTx<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            admission: self.admission,
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for QueueTx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTx")
            .field("name", &self.name)
            .field("admission", &self.admission)
            .field("len", &self.inner.len())
            .finish()
    }
}

/// Receiving half of a bounded queue. Cloning it yields another competing consumer.
pub struct QueueRx<T = Record> {
    name: Arc<str>,
    inner: flume::Receiver<T>,
}

impl<T> QueueRx<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receives the next item, or `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.recv_async().await.ok()
    }

    /// Takes the oldest buffered item without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.inner.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether every sender was dropped. Buffered items may still be pending.
    pub fn is_closed(&self) -> bool {
        self.inner.is_disconnected()
    }
}

impl<T> Clone for QueueRx<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for QueueRx<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRx")
            .field("name", &self.name)
            .field("len", &self.inner.len())
            .finish()
    }
}

/// Creates a bounded queue holding at most `capacity` items.
///
/// A capacity of zero is raised to one; a rendezvous queue would make [`QueueTx::try_send`]
/// fail whenever no consumer is parked.
pub fn create_queue<T>(
    name: impl Into<Arc<str>>,
    capacity: usize,
    admission: AdmissionPolicy,
) -> (QueueTx<T>, QueueRx<T>) {
    let name = name.into();
    let (tx, rx) = flume::bounded(capacity.max(1));

    (
        QueueTx {
            name: name.clone(),
            admission,
            inner: tx,
        },
        QueueRx { name, inner: rx },
    )
}
