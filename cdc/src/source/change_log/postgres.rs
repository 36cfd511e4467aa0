use std::sync::OnceLock;

use cdc_config::shared::{CDC_SOURCE_OPTIONS, PgConnectionConfig};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::postgres::{connect_pool, quote_table_name};
use crate::source::change_log::{ChangeLog, ChangeRow, PollWindow};

/// Change log read from a Postgres table with an `entry_time` column.
#[derive(Debug)]
pub struct PgChangeLog {
    config: PgConnectionConfig,
    table: String,
    query: String,
    pool: OnceLock<PgPool>,
}

impl PgChangeLog {
    pub fn new(config: PgConnectionConfig, table: impl Into<String>) -> Self {
        let table = table.into();
        let query = format!(
            "select t.entry_time::timestamptz as logical_time, to_jsonb(t) as payload \
             from {} t \
             where t.entry_time > $1 and t.entry_time <= $2 \
             order by t.entry_time \
             limit $3",
            quote_table_name(&table)
        );

        Self {
            config,
            table,
            query,
            pool: OnceLock::new(),
        }
    }

    fn pool(&self) -> CdcResult<&PgPool> {
        match self.pool.get() {
            Some(pool) => Ok(pool),
            None => bail!(
                ErrorKind::InvalidState,
                "Postgres change log used before connecting",
                self.table.clone()
            ),
        }
    }
}

impl ChangeLog for PgChangeLog {
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

    async fn fetch(&self, window: &PollWindow) -> CdcResult<Vec<ChangeRow>> {
        let limit = i64::try_from(window.limit).unwrap_or(i64::MAX);
        let rows: Vec<(DateTime<Utc>, serde_json::Value)> = match sqlx::query_as(&self.query)
            .bind(window.after)
            .bind(window.until)
            .bind(limit)
            .fetch_all(self.pool()?)
            .await
        {
            Ok(rows) => rows,
            Err(err) => bail!(
                ErrorKind::SourceQueryFailed,
                "Failed to poll change log",
                self.table.clone(),
                source: err
            ),
        };

        debug!(table = %self.table, rows = rows.len(), after = %window.after, until = %window.until, "polled change log");

        Ok(rows
            .into_iter()
            .map(|(logical_time, payload)| ChangeRow {
                logical_time,
                payload,
            })
            .collect())
    }

    async fn close(&self) -> CdcResult<()> {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
            info!(table = %self.table, "closed change log connections");
        }

        Ok(())
    }
}
