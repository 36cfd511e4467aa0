use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::source::broker::{Broker, InboundMessage, Subscription};

#[derive(Debug, Default)]
struct Inner {
    subscribers: HashMap<String, Vec<flume::Sender<Vec<u8>>>>,
    connected: bool,
    fail_connect: bool,
}

/// In-process broker for tests and local runs.
///
/// Every subscriber of a topic receives every message published after it subscribed. Messages
/// published to a topic without subscribers are discarded.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    acked: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following [`Broker::connect`] fail.
    pub async fn fail_connect(&self, fail: bool) {
        self.inner.lock().await.fail_connect = fail;
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.connected
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .await
            .subscribers
            .get(topic)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_disconnected()).count())
    }

    /// Number of messages acknowledged by subscribers.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }
}

impl Broker for MemoryBroker {
    type Subscription = MemorySubscription;

    async fn connect(&self) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_connect {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Failed to connect to the memory broker"
            );
        }

        inner.connected = true;
        info!("connected to memory broker");

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> CdcResult<Self::Subscription> {
        let mut inner = self.inner.lock().await;
        if !inner.connected {
            bail!(
                ErrorKind::InvalidState,
                "Memory broker is not connected",
                topic
            );
        }

        let (tx, rx) = flume::unbounded();
        inner
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        debug!(topic, "subscribed to memory topic");

        Ok(MemorySubscription {
            rx,
            acked: self.acked.clone(),
        })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.connected {
            bail!(
                ErrorKind::InvalidState,
                "Memory broker is not connected",
                topic
            );
        }

        let Some(senders) = inner.subscribers.get_mut(topic) else {
            debug!(topic, "no subscribers, message discarded");
            return Ok(());
        };

        senders.retain(|tx| tx.send(payload.clone()).is_ok());

        Ok(())
    }

    async fn disconnect(&self) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        inner.connected = false;
        // Dropping the senders ends every open subscription.
        inner.subscribers.clear();
        info!("disconnected from memory broker");

        Ok(())
    }
}

#[derive(Debug)]
pub struct MemorySubscription {
    rx: flume::Receiver<Vec<u8>>,
    acked: Arc<AtomicU64>,
}

impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Option<InboundMessage> {
        let payload = self.rx.recv_async().await.ok()?;
        let acked = self.acked.clone();

        Some(InboundMessage::with_acker(payload, move || {
            acked.fetch_add(1, Ordering::Relaxed);
        }))
    }

    async fn unsubscribe(self) -> CdcResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_messages_reach_every_subscriber() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();
        let mut first = broker.subscribe("telemetry").await.unwrap();
        let mut second = broker.subscribe("telemetry").await.unwrap();

        broker.publish("telemetry", b"hello".to_vec()).await.unwrap();

        assert_eq!(first.next_message().await.unwrap().ack(), b"hello");
        assert_eq!(second.next_message().await.unwrap().payload(), b"hello");
        assert_eq!(broker.acked(), 1);
    }

    #[tokio::test]
    async fn disconnect_ends_subscriptions() {
        let broker = MemoryBroker::new();
        broker.connect().await.unwrap();
        let mut subscription = broker.subscribe("telemetry").await.unwrap();

        broker.disconnect().await.unwrap();

        assert!(subscription.next_message().await.is_none());
        assert!(broker.publish("telemetry", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn failing_connect_is_reported() {
        let broker = MemoryBroker::new();
        broker.fail_connect(true).await;

        let err = broker.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
        assert!(!broker.is_connected().await);
    }
}
