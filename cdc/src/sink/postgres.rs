use std::sync::OnceLock;

use async_trait::async_trait;
use cdc_config::shared::{CDC_SINK_OPTIONS, PgConnectionConfig};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::postgres::{connect_pool, quote_table_name};
use crate::sink::Sink;
use crate::types::Record;

/// Writes records into a Postgres table.
///
/// Rows are keyed by `(vehicle_id, entry_time)`; a redelivered record hits the conflict clause
/// and is ignored, which keeps at-least-once delivery idempotent. The target table is expected
/// to have a unique constraint on those columns.
#[derive(Debug)]
pub struct PostgresSink {
    config: PgConnectionConfig,
    insert_statement: String,
    pool: OnceLock<PgPool>,
}

impl PostgresSink {
    pub fn new(config: PgConnectionConfig, table: &str) -> Self {
        let insert_statement = format!(
            "insert into {} \
             (vehicle_id, entry_time, voltage, current, capacity, power, temperature, soc, internal_resistance) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             on conflict do nothing",
            quote_table_name(table)
        );

        Self {
            config,
            insert_statement,
            pool: OnceLock::new(),
        }
    }

    fn pool(&self) -> CdcResult<&PgPool> {
        match self.pool.get() {
            Some(pool) => Ok(pool),
            None => bail!(
                ErrorKind::InvalidState,
                "Postgres sink used before connecting",
                self.config.host.clone()
            ),
        }
    }
}

#[async_trait]
impl Sink for PostgresSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self) -> CdcResult<()> {
        if self.pool.get().is_some() {
            return Ok(());
        }

        let pool = connect_pool(
            &self.config,
            &CDC_SINK_OPTIONS,
            ErrorKind::SinkConnectionFailed,
        )
        .await?;

        // A concurrent connect may have won; its pool is kept and ours is dropped.
        let _ = self.pool.set(pool);

        Ok(())
    }

    async fn write(&self, record: &Record) -> CdcResult<()> {
        let result = sqlx::query(&self.insert_statement)
            .bind(&record.id)
            .bind(record.entry_time)
            .bind(record.voltage)
            .bind(record.current)
            .bind(record.capacity)
            .bind(record.power)
            .bind(record.temperature)
            .bind(record.soc)
            .bind(record.internal_resistance)
            .execute(self.pool()?)
            .await;

        match result {
            Ok(done) => {
                if done.rows_affected() == 0 {
                    debug!(id = %record.id, entry_time = %record.entry_time, "record already stored");
                }

                Ok(())
            }
            Err(err) => bail!(
                ErrorKind::SinkWriteFailed,
                "Failed to insert record into postgres",
                format!("id {}: {err}", record.id),
                source: err
            ),
        }
    }

    async fn shutdown(&self) -> CdcResult<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            info!(host = %self.config.host, "closed postgres sink connections");
        }

        Ok(())
    }
}
