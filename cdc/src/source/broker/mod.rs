//! Publish/subscribe transports feeding the push source.

mod memory;
mod postgres;

use std::fmt;
use std::future::Future;

use crate::error::CdcResult;

pub use memory::{MemoryBroker, MemorySubscription};
pub use postgres::{PgBroker, PgSubscription};

/// A message delivered by a [`Subscription`].
///
/// Acknowledging hands the payload back and tells the broker the message was taken; messages
/// dropped without [`InboundMessage::ack`] are never acknowledged.
pub struct InboundMessage {
    payload: Vec<u8>,
    acker: Option<Box<dyn FnOnce() + Send>>,
}

impl InboundMessage {
    /// Creates a message for a transport without acknowledgements.
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            acker: None,
        }
    }

    pub fn with_acker<F>(payload: Vec<u8>, acker: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            payload,
            acker: Some(Box::new(acker)),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledges the message and returns its payload.
    pub fn ack(mut self) -> Vec<u8> {
        if let Some(acker) = self.acker.take() {
            acker();
        }

        self.payload
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("payload_len", &self.payload.len())
            .field("ackable", &self.acker.is_some())
            .finish()
    }
}

/// A live subscription to one topic.
pub trait Subscription: Send + 'static {
    /// Waits for the next message.
    ///
    /// Returns `None` only when the subscription ended for good; transient connection loss is
    /// recovered by the transport without surfacing here.
    fn next_message(&mut self) -> impl Future<Output = Option<InboundMessage>> + Send;

    fn unsubscribe(self) -> impl Future<Output = CdcResult<()>> + Send;
}

/// A publish/subscribe broker.
pub trait Broker: Send + Sync + 'static {
    type Subscription: Subscription;

    fn connect(&self) -> impl Future<Output = CdcResult<()>> + Send;

    fn subscribe(&self, topic: &str) -> impl Future<Output = CdcResult<Self::Subscription>> + Send;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> impl Future<Output = CdcResult<()>> + Send;

    fn disconnect(&self) -> impl Future<Output = CdcResult<()>> + Send;
}
