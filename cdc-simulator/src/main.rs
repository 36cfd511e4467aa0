//! Publishes simulated battery readings to the telemetry broker.
//!
//! Useful to drive a locally running replicator. Readings are published through the same
//! [`Broker`] abstraction the replicator subscribes with.

use std::time::Duration;

use anyhow::Context;
use cdc::source::broker::{Broker, MemoryBroker, PgBroker, Subscription};
use cdc::types::Record;
use cdc_config::shared::{PgConnectionConfig, TlsConfig};
use cdc_telemetry::tracing::init_tracing;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info, warn};

use crate::generator::ReadingGenerator;

mod generator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Publishes simulated vehicle battery readings", long_about = None)]
struct Args {
    /// Delay between two published readings, in milliseconds.
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Number of simulated vehicles.
    #[arg(long, default_value = "10")]
    devices: usize,

    /// Stop after this many readings; runs until Ctrl+C when absent.
    #[arg(long)]
    count: Option<u64>,

    /// Channel the readings are published on.
    #[arg(long, default_value = "vehicle_telemetry")]
    topic: String,

    /// Publish to an in-process broker and decode every reading back, without a database.
    #[arg(long)]
    dry_run: bool,

    /// Postgres host.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Postgres port.
    #[arg(long, default_value = "5432")]
    port: u16,

    /// Database name.
    #[arg(long, default_value = "postgres")]
    database: String,

    /// Postgres username.
    #[arg(long, default_value = "postgres")]
    username: String,

    /// Postgres password.
    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    info!(
        topic = %args.topic,
        devices = args.devices,
        interval_ms = args.interval_ms,
        count = args.count,
        dry_run = args.dry_run,
        "starting telemetry simulator"
    );

    if args.dry_run {
        let broker = MemoryBroker::new();
        broker.connect().await?;

        // Decode what is published to verify the wire format end to end.
        let mut subscription = broker.subscribe(&args.topic).await?;
        let checker = tokio::spawn(async move {
            while let Some(message) = subscription.next_message().await {
                match Record::decode(&message.ack()) {
                    Ok(record) => debug!(id = %record.id, "dry run reading decoded"),
                    Err(err) => warn!(error = %err, "dry run reading failed to decode"),
                }
            }
        });

        let result = simulate(&broker, &args).await;
        broker.disconnect().await?;
        checker.await.context("dry run checker panicked")?;

        return result;
    }

    let broker = PgBroker::new(PgConnectionConfig {
        host: args.host.clone(),
        port: args.port,
        name: args.database.clone(),
        username: args.username.clone(),
        password: args.password.clone().map(Into::into),
        tls: TlsConfig::disabled(),
        max_connections: 1,
    });
    broker
        .connect()
        .await
        .with_context(|| format!("connecting to postgres at {}:{}", args.host, args.port))?;

    let result = simulate(&broker, &args).await;
    broker.disconnect().await?;

    result
}

/// Publishes readings until `count` is reached or Ctrl+C is pressed.
async fn simulate<B: Broker>(broker: &B, args: &Args) -> anyhow::Result<()> {
    let mut generator = ReadingGenerator::new(rand::thread_rng(), args.devices);
    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut published = 0u64;

    loop {
        if args.count.is_some_and(|count| published >= count) {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl+c received, stopping simulator");
                break;
            }
            _ = interval.tick() => {}
        }

        let reading = generator.next_reading(Utc::now());
        let payload = reading
            .to_json_bytes()
            .context("encoding simulated reading")?;
        broker.publish(&args.topic, payload).await?;

        published += 1;
        debug!(id = %reading.id, capacity = reading.capacity, "reading published");
    }

    info!(published, "simulator finished");

    Ok(())
}
