#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::time::Duration;

use cdc::concurrency::queue::{QueueRx, QueueTx, create_queue};
use cdc::error::ErrorKind;
use cdc::pipeline::Pipeline;
use cdc::sink::SinkSpec;
use cdc::sink::memory::MemorySink;
use cdc::source::change_log::MemoryChangeLog;
use cdc::source::{PollOutcome, PollSource};
use cdc::test_utils::record::{test_record, time_at};
use cdc::test_utils::sink::{BlockingSink, TestSinkWrapper};
use cdc::types::Record;
use cdc_config::shared::{AdmissionPolicy, PipelineConfig, PollConfig, QueueConfig};
use cdc_telemetry::tracing::init_test_tracing;
use chrono::{DateTime, Utc};
use serde_json::json;

/// Far enough in the future that the confidence window never withholds test rows.
fn late() -> DateTime<Utc> {
    time_at(1_000_000)
}

fn poll_config(batch_size: u32, confidence_window_ms: u64) -> PollConfig {
    PollConfig {
        batch_size,
        confidence_window_ms,
        non_empty_delay_ms: 10,
        empty_delay_ms: 10,
        failure_delay_ms: 10,
        lookback_ms: 0,
    }
}

async fn change_log_with(times: &[i64]) -> MemoryChangeLog {
    let change_log = MemoryChangeLog::new();
    for (i, offset) in times.iter().enumerate() {
        change_log
            .insert(&test_record(&format!("vehicle-{i}"), *offset))
            .await
            .unwrap();
    }

    change_log
}

fn ingestion(capacity: usize) -> (QueueTx, QueueRx) {
    create_queue("ingestion", capacity, AdmissionPolicy::Block)
}

fn drain(rx: &QueueRx) -> Vec<Record> {
    let mut records = Vec::new();
    while let Some(record) = rx.try_recv() {
        records.push(record);
    }
    records
}

fn times(records: &[Record]) -> Vec<DateTime<Utc>> {
    records.iter().map(|record| record.entry_time).collect()
}

#[tokio::test]
async fn watermark_advances_to_the_last_enqueued_row() {
    init_test_tracing();

    let change_log = change_log_with(&[3, 1, 2]).await;
    let source = PollSource::with_watermark(change_log, poll_config(100, 0), time_at(0));
    let (tx, rx) = ingestion(10);

    let outcome = source.poll_once_at(&tx, late()).await;

    let PollOutcome::Rows {
        enqueued,
        dropped,
        deferred,
        watermark,
    } = outcome
    else {
        panic!("expected rows, got {outcome:?}");
    };
    assert_eq!((enqueued, dropped, deferred), (3, 0, 0));
    assert_eq!(watermark, time_at(3));
    assert_eq!(source.watermark().current(), time_at(3));
    assert_eq!(times(&drain(&rx)), vec![time_at(1), time_at(2), time_at(3)]);

    // Nothing new: the watermark stays where it is.
    assert!(matches!(source.poll_once_at(&tx, late()).await, PollOutcome::Empty));
    assert_eq!(source.watermark().current(), time_at(3));
}

#[tokio::test]
async fn rows_inside_the_confidence_window_are_deferred() {
    init_test_tracing();

    let change_log = change_log_with(&[10, 100]).await;
    // One minute confidence window.
    let source = PollSource::with_watermark(change_log, poll_config(100, 60_000), time_at(0));
    let (tx, rx) = ingestion(10);

    let outcome = source.poll_once_at(&tx, time_at(120)).await;
    assert!(matches!(outcome, PollOutcome::Rows { enqueued: 1, .. }));
    assert_eq!(times(&drain(&rx)), vec![time_at(10)]);
    assert_eq!(source.watermark().current(), time_at(10));

    let outcome = source.poll_once_at(&tx, time_at(200)).await;
    assert!(matches!(outcome, PollOutcome::Rows { enqueued: 1, .. }));
    assert_eq!(times(&drain(&rx)), vec![time_at(100)]);
    assert_eq!(source.watermark().current(), time_at(100));
}

#[tokio::test]
async fn window_not_past_the_watermark_does_not_query() {
    init_test_tracing();

    let change_log = change_log_with(&[10]).await;
    let source = PollSource::with_watermark(change_log, poll_config(100, 60_000), time_at(50));
    let (tx, _rx) = ingestion(10);

    let outcome = source.poll_once_at(&tx, time_at(100)).await;

    assert!(matches!(outcome, PollOutcome::Empty));
    assert_eq!(source.change_log().fetch_count().await, 0);
}

#[tokio::test]
async fn failed_admission_keeps_the_watermark_and_the_batch_is_polled_again() {
    init_test_tracing();

    let change_log = change_log_with(&[1, 2, 3]).await;
    let source = PollSource::with_watermark(change_log, poll_config(100, 0), time_at(0));
    let (tx, rx) = create_queue("ingestion", 3, AdmissionPolicy::Reject);

    // One slot is taken, so the third row of the batch is rejected.
    tx.admit(test_record("unrelated", 500)).await.unwrap();

    let outcome = source.poll_once_at(&tx, late()).await;
    let PollOutcome::Failed(err) = outcome else {
        panic!("expected a failed poll, got {outcome:?}");
    };
    assert_eq!(err.kind(), ErrorKind::QueueFull);
    assert_eq!(source.watermark().current(), time_at(0));
    assert_eq!(drain(&rx).len(), 3);

    let outcome = source.poll_once_at(&tx, late()).await;
    assert!(matches!(outcome, PollOutcome::Rows { enqueued: 3, .. }));
    assert_eq!(times(&drain(&rx)), vec![time_at(1), time_at(2), time_at(3)]);
    assert_eq!(source.watermark().current(), time_at(3));
}

#[tokio::test]
async fn failed_query_keeps_the_watermark() {
    init_test_tracing();

    let change_log = change_log_with(&[1]).await;
    change_log.fail_next_fetches(1).await;
    let source = PollSource::with_watermark(change_log, poll_config(100, 0), time_at(0));
    let (tx, rx) = ingestion(10);

    let outcome = source.poll_once_at(&tx, late()).await;
    let PollOutcome::Failed(err) = outcome else {
        panic!("expected a failed poll, got {outcome:?}");
    };
    assert_eq!(err.kind(), ErrorKind::SourceQueryFailed);
    assert_eq!(source.watermark().current(), time_at(0));
    assert!(rx.is_empty());

    assert!(matches!(
        source.poll_once_at(&tx, late()).await,
        PollOutcome::Rows { enqueued: 1, .. }
    ));
    assert_eq!(source.watermark().current(), time_at(1));
}

#[tokio::test]
async fn rows_sharing_the_last_time_of_a_full_batch_are_held_back() {
    init_test_tracing();

    let change_log = change_log_with(&[1, 2, 2, 3]).await;
    let source = PollSource::with_watermark(change_log, poll_config(3, 0), time_at(0));
    let (tx, rx) = ingestion(10);

    let outcome = source.poll_once_at(&tx, late()).await;
    assert!(matches!(
        outcome,
        PollOutcome::Rows {
            enqueued: 1,
            deferred: 2,
            ..
        }
    ));
    assert_eq!(source.watermark().current(), time_at(1));

    let outcome = source.poll_once_at(&tx, late()).await;
    assert!(matches!(
        outcome,
        PollOutcome::Rows {
            enqueued: 2,
            deferred: 1,
            ..
        }
    ));
    assert_eq!(source.watermark().current(), time_at(2));

    let outcome = source.poll_once_at(&tx, late()).await;
    assert!(matches!(outcome, PollOutcome::Rows { enqueued: 1, .. }));
    assert_eq!(source.watermark().current(), time_at(3));

    assert_eq!(
        times(&drain(&rx)),
        vec![time_at(1), time_at(2), time_at(2), time_at(3)]
    );
}

#[tokio::test]
async fn full_batch_of_a_single_time_is_processed() {
    init_test_tracing();

    let change_log = change_log_with(&[5, 5, 5]).await;
    let source = PollSource::with_watermark(change_log, poll_config(2, 0), time_at(0));
    let (tx, rx) = ingestion(10);

    let outcome = source.poll_once_at(&tx, late()).await;

    assert!(matches!(
        outcome,
        PollOutcome::Rows {
            enqueued: 2,
            deferred: 0,
            ..
        }
    ));
    assert_eq!(source.watermark().current(), time_at(5));
    assert_eq!(drain(&rx).len(), 2);
}

#[tokio::test]
async fn undecodable_rows_are_skipped_but_processed() {
    init_test_tracing();

    let change_log = MemoryChangeLog::new();
    change_log
        .insert_raw(time_at(1), json!({ "id": 17, "entry_time": "2024-01-01T00:00:00Z" }))
        .await;
    change_log.insert(&test_record("vehicle-1", 2)).await.unwrap();
    let source = PollSource::with_watermark(change_log, poll_config(100, 0), time_at(0));
    let (tx, rx) = ingestion(10);

    let outcome = source.poll_once_at(&tx, late()).await;

    assert!(matches!(
        outcome,
        PollOutcome::Rows {
            enqueued: 1,
            dropped: 1,
            ..
        }
    ));
    assert_eq!(source.watermark().current(), time_at(2));
    assert_eq!(drain(&rx), vec![test_record("vehicle-1", 2)]);
}

#[tokio::test]
async fn rows_outside_the_requested_window_are_not_enqueued() {
    init_test_tracing();

    let change_log = change_log_with(&[0, 1, 500]).await;
    change_log.ignore_window_bounds(true).await;
    let source = PollSource::with_watermark(change_log, poll_config(100, 60_000), time_at(0));
    let (tx, rx) = ingestion(10);

    let outcome = source.poll_once_at(&tx, time_at(120)).await;

    assert!(matches!(
        outcome,
        PollOutcome::Rows {
            enqueued: 1,
            deferred: 1,
            ..
        }
    ));
    assert_eq!(times(&drain(&rx)), vec![time_at(1)]);
    assert_eq!(source.watermark().current(), time_at(1));
}

#[tokio::test]
async fn watermark_never_decreases_across_polls() {
    init_test_tracing();

    let change_log = change_log_with(&[4, 8]).await;
    let source = PollSource::with_watermark(change_log.clone(), poll_config(100, 0), time_at(0));
    let (tx, _rx) = ingestion(100);

    let mut previous = source.watermark().current();
    for round in 0..6 {
        // A late writer inserts rows behind the watermark, which must never pull it back.
        change_log
            .insert(&test_record("late-writer", round))
            .await
            .unwrap();
        change_log
            .insert(&test_record("vehicle-1", 10 + round))
            .await
            .unwrap();

        let _ = source.poll_once_at(&tx, late()).await;

        let current = source.watermark().current();
        assert!(current >= previous);
        previous = current;
    }

    assert_eq!(previous, time_at(15));
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_source_feeds_a_pipeline_until_shutdown() {
    init_test_tracing();

    let change_log = change_log_with(&[1, 2, 3, 4, 5]).await;
    let sink = TestSinkWrapper::wrap(MemorySink::new());
    let source = PollSource::with_watermark(change_log.clone(), poll_config(2, 0), time_at(0));
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        source,
        vec![SinkSpec::new("primary", Arc::new(sink.clone()))],
    );

    pipeline.start().await.unwrap();
    assert!(change_log.is_connected().await);

    let done = sink.wait_for_records(5).await;
    done.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    let mut written = sink.records().await;
    written.sort_by_key(|record| record.entry_time);
    assert_eq!(
        times(&written),
        vec![time_at(1), time_at(2), time_at(3), time_at(4), time_at(5)]
    );
    assert_eq!(pipeline.source().watermark().current(), time_at(5));
    assert!(!change_log.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn each_outcome_waits_its_own_delay_before_the_next_poll() {
    init_test_tracing();

    let change_log = change_log_with(&[1, 2]).await;
    change_log.fail_next_fetches(1).await;
    let config = PollConfig {
        non_empty_delay_ms: 100,
        empty_delay_ms: 700,
        failure_delay_ms: 300,
        ..poll_config(100, 0)
    };
    let source = PollSource::with_watermark(change_log.clone(), config, time_at(0));
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        source,
        vec![SinkSpec::new("primary", Arc::new(MemorySink::new()))],
    );

    pipeline.start().await.unwrap();
    // Failed, then rows, then empty, then the poll after the empty delay.
    while change_log.fetch_count().await < 4 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    pipeline.shutdown_and_wait().await.unwrap();

    let fetched_at = change_log.fetch_instants().await;
    let gaps: Vec<Duration> = fetched_at
        .windows(2)
        .take(3)
        .map(|pair| pair[1] - pair[0])
        .collect();
    let expected = [
        Duration::from_millis(300),
        Duration::from_millis(100),
        Duration::from_millis(700),
    ];
    for (gap, expected) in gaps.iter().zip(expected) {
        assert!(
            *gap >= expected && *gap < expected + Duration::from_millis(10),
            "gap {gap:?}, expected {expected:?}"
        );
    }
    assert_eq!(gaps.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_blocked_on_admission_is_enqueued_before_shutdown_completes() {
    init_test_tracing();

    let change_log = change_log_with(&[1, 2, 3, 4, 5, 6]).await;
    let blocking = BlockingSink::new();
    let sink = TestSinkWrapper::wrap(blocking.clone());
    let source = PollSource::with_watermark(change_log.clone(), poll_config(100, 0), time_at(0));
    let config = PipelineConfig {
        ingestion_queue: QueueConfig {
            capacity: 1,
            admission: AdmissionPolicy::Block,
        },
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(
        config,
        source,
        vec![
            SinkSpec::new("primary", Arc::new(sink.clone()))
                .with_queue_capacity(1)
                .with_workers(1),
        ],
    );

    let entered = blocking.write_entered();
    pipeline.start().await.unwrap();
    entered.notified().await;

    // Let the poll block on admitting the rest of the batch.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pipeline.source().watermark().current(), time_at(0));

    pipeline.shutdown();
    blocking.unblock();
    pipeline.wait().await.unwrap();

    let mut written = sink.records().await;
    written.sort_by_key(|record| record.entry_time);
    assert_eq!(
        times(&written),
        (1..=6).map(time_at).collect::<Vec<_>>()
    );
    assert_eq!(pipeline.source().watermark().current(), time_at(6));
    assert_eq!(change_log.fetch_count().await, 1);
}
