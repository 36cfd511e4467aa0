//! Helpers shared by the Postgres backed broker, change log and sink.

use cdc_config::shared::{IntoConnectOptions, PgConnectionConfig, PgConnectionOptions};
use pg_escape::quote_identifier;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};

/// Opens a connection pool and verifies the connection eagerly.
///
/// Failures are reported with `error_kind`, so callers can tell source and sink connection
/// failures apart.
pub(crate) async fn connect_pool(
    config: &PgConnectionConfig,
    options: &PgConnectionOptions,
    error_kind: ErrorKind,
) -> CdcResult<PgPool> {
    let connect_options = config.with_db(Some(options));

    match PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connect_options)
        .await
    {
        Ok(pool) => {
            info!(
                host = %config.host,
                port = config.port,
                database = %config.name,
                application_name = %options.application_name,
                "connected to postgres"
            );
            Ok(pool)
        }
        Err(err) => bail!(
            error_kind,
            "Failed to connect to postgres",
            format!("{}:{}/{}: {err}", config.host, config.port, config.name),
            source: err
        ),
    }
}

/// Quotes a possibly schema-qualified table name, e.g. `telemetry.vehicle_data`.
pub(crate) fn quote_table_name(table: &str) -> String {
    table
        .split('.')
        .map(|part| quote_identifier(part).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}
