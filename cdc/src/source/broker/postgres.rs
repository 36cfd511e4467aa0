use std::sync::OnceLock;
use std::time::Duration;

use cdc_config::shared::{CDC_SOURCE_OPTIONS, PgConnectionConfig};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::{info, warn};

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::postgres::connect_pool;
use crate::source::broker::{Broker, InboundMessage, Subscription};

/// Pause before receiving again after the listener failed to reconnect.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker on top of Postgres `LISTEN`/`NOTIFY`.
///
/// The listener connection re-establishes itself and re-issues `LISTEN` after a connection loss.
/// Notifications sent while it was disconnected are lost, and `NOTIFY` has no acknowledgements.
#[derive(Debug)]
pub struct PgBroker {
    config: PgConnectionConfig,
    pool: OnceLock<PgPool>,
}

impl PgBroker {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self {
            config,
            pool: OnceLock::new(),
        }
    }

    fn pool(&self) -> CdcResult<&PgPool> {
        match self.pool.get() {
            Some(pool) => Ok(pool),
            None => bail!(
                ErrorKind::InvalidState,
                "Postgres broker used before connecting",
                self.config.host.clone()
            ),
        }
    }
}

impl Broker for PgBroker {
    type Subscription = PgSubscription;

    async fn connect(&self) -> CdcResult<()> {
        if self.pool.get().is_some() {
            return Ok(());
        }

        let pool = connect_pool(
            &self.config,
            &CDC_SOURCE_OPTIONS,
            ErrorKind::SourceConnectionFailed,
        )
        .await?;
        let _ = self.pool.set(pool);

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> CdcResult<Self::Subscription> {
        let mut listener = match PgListener::connect_with(self.pool()?).await {
            Ok(listener) => listener,
            Err(err) => bail!(
                ErrorKind::SourceConnectionFailed,
                "Failed to open postgres listener",
                self.config.host.clone(),
                source: err
            ),
        };

        if let Err(err) = listener.listen(topic).await {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Failed to listen on postgres channel",
                topic,
                source: err
            );
        }
        info!(topic, "listening on postgres channel");

        Ok(PgSubscription {
            listener,
            topic: topic.to_string(),
        })
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> CdcResult<()> {
        let payload = match String::from_utf8(payload) {
            Ok(payload) => payload,
            Err(err) => bail!(
                ErrorKind::InvalidData,
                "Notification payload is not valid UTF-8",
                topic,
                source: err
            ),
        };

        sqlx::query("select pg_notify($1, $2)")
            .bind(topic)
            .bind(payload)
            .execute(self.pool()?)
            .await?;

        Ok(())
    }

    async fn disconnect(&self) -> CdcResult<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            info!(host = %self.config.host, "closed postgres broker connections");
        }

        Ok(())
    }
}

pub struct PgSubscription {
    listener: PgListener,
    topic: String,
}

impl Subscription for PgSubscription {
    async fn next_message(&mut self) -> Option<InboundMessage> {
        loop {
            match self.listener.try_recv().await {
                Ok(Some(notification)) => {
                    return Some(InboundMessage::new(
                        notification.payload().as_bytes().to_vec(),
                    ));
                }
                Ok(None) => {
                    warn!(topic = %self.topic, "listener connection lost, reconnecting");
                }
                Err(err) => {
                    warn!(topic = %self.topic, error = %err, "listener failed to reconnect, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn unsubscribe(mut self) -> CdcResult<()> {
        self.listener.unlisten_all().await?;
        info!(topic = %self.topic, "stopped listening on postgres channel");

        Ok(())
    }
}
