#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdc::error::{CdcResult, ErrorKind};
use cdc::pipeline::{Pipeline, PipelineStatus};
use cdc::sink::memory::MemorySink;
use cdc::sink::{Sink, SinkSpec};
use cdc::test_utils::record::{test_record, test_records, time_at};
use cdc::test_utils::sink::{BlockingSink, FailingSink, TestSinkWrapper};
use cdc::test_utils::source::{ManualSource, ManualSourceHandle};
use cdc::types::Record;
use cdc_config::shared::{
    AdmissionPolicy, FanoutPolicy, PipelineConfig, QueueConfig, RetryConfig,
};
use cdc_telemetry::tracing::init_test_tracing;
use tokio::time::{sleep, timeout};

fn pipeline_config(capacity: usize, admission: AdmissionPolicy, fanout: FanoutPolicy) -> PipelineConfig {
    PipelineConfig {
        ingestion_queue: QueueConfig {
            capacity,
            admission,
        },
        fanout,
    }
}

fn memory_sink() -> TestSinkWrapper<MemorySink> {
    TestSinkWrapper::wrap(MemorySink::new())
}

fn create_pipeline(sinks: Vec<SinkSpec>) -> (Pipeline<ManualSource>, ManualSourceHandle) {
    let (source, handle) = ManualSource::new();
    let pipeline = Pipeline::new(PipelineConfig::default(), source, sinks);

    (pipeline, handle)
}

fn sorted_by_time(mut records: Vec<Record>) -> Vec<Record> {
    records.sort_by_key(|record| (record.entry_time, record.id.clone()));
    records
}

/// Delays writes of the record at `time_at(0)` so a later record can overtake it.
#[derive(Debug)]
struct DelayFirstRecordSink;

#[async_trait]
impl Sink for DelayFirstRecordSink {
    fn name(&self) -> &'static str {
        "delay_first"
    }

    async fn write(&self, record: &Record) -> CdcResult<()> {
        if record.entry_time == time_at(0) {
            sleep(Duration::from_millis(300)).await;
        }

        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn every_admitted_record_reaches_every_sink() {
    init_test_tracing();

    let primary = memory_sink();
    let replica = memory_sink();
    let (mut pipeline, source) = create_pipeline(vec![
        SinkSpec::new("primary", Arc::new(primary.clone())),
        SinkSpec::new("replica", Arc::new(replica.clone())).with_workers(3),
    ]);

    pipeline.start().await.unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Running);

    let records = test_records("vehicle-1", 50);
    let primary_done = primary.wait_for_records(50).await;
    let replica_done = replica.wait_for_records(50).await;
    for record in records.clone() {
        source.admit(record).await.unwrap();
    }

    primary_done.notified().await;
    replica_done.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(sorted_by_time(primary.records().await), records);
    assert_eq!(sorted_by_time(replica.records().await), records);
    assert_eq!(pipeline.dispatcher_stats().dispatched, 50);
    assert_eq!(pipeline.sink_stats("primary").unwrap().written, 50);
    assert_eq!(pipeline.sink_stats("replica").unwrap().written, 50);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drains_buffered_records_exactly_once() {
    init_test_tracing();

    let primary = memory_sink();
    let replica = memory_sink();
    let (mut pipeline, source) = create_pipeline(vec![
        SinkSpec::new("primary", Arc::new(primary.clone())),
        SinkSpec::new("replica", Arc::new(replica.clone())),
    ]);

    pipeline.start().await.unwrap();

    let records = test_records("vehicle-1", 20);
    for record in records.clone() {
        source.admit(record).await.unwrap();
    }

    // No waiting: everything still buffered must be delivered before wait returns.
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(pipeline.status(), PipelineStatus::Stopped);
    assert_eq!(sorted_by_time(primary.records().await), records);
    assert_eq!(sorted_by_time(replica.records().await), records);
    assert_eq!(pipeline.dispatcher_stats().dispatched, 20);
    assert_eq!(pipeline.dispatcher_stats().dropped, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_closes_sinks_then_source() {
    init_test_tracing();

    let primary = memory_sink();
    let (mut pipeline, source) =
        create_pipeline(vec![SinkSpec::new("primary", Arc::new(primary.clone()))]);

    pipeline.start().await.unwrap();
    assert!(primary.connect_called().await);
    assert!(source.is_connected());

    pipeline.shutdown_and_wait().await.unwrap();

    assert!(primary.shutdown_called().await);
    assert!(primary.wrapped().is_shut_down().await);
    assert!(source.is_closed());
    assert!(source.admit(test_record("late", 0)).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn full_sink_queue_blocks_the_source() {
    init_test_tracing();

    let blocking = BlockingSink::new();
    let sink = TestSinkWrapper::wrap(blocking.clone());
    let (source, handle) = ManualSource::new();
    let mut pipeline = Pipeline::new(
        pipeline_config(1, AdmissionPolicy::Block, FanoutPolicy::Blocking),
        source,
        vec![
            SinkSpec::new("blocked", Arc::new(sink.clone()))
                .with_queue_capacity(1)
                .with_workers(1),
        ],
    );

    pipeline.start().await.unwrap();

    // The first record occupies the only worker.
    let write_entered = blocking.write_entered();
    handle.admit(test_record("vehicle-1", 0)).await.unwrap();
    write_entered.notified().await;

    // One record fits in the sink queue, one is held by the dispatcher and one fits in the
    // ingestion queue.
    for offset in 1..=3 {
        timeout(Duration::from_secs(5), handle.admit(test_record("vehicle-1", offset)))
            .await
            .unwrap()
            .unwrap();
    }

    let blocked_handle = handle.clone();
    let blocked_admit =
        tokio::spawn(async move { blocked_handle.admit(test_record("vehicle-1", 4)).await });

    sleep(Duration::from_millis(200)).await;
    assert!(!blocked_admit.is_finished());

    blocking.unblock();
    timeout(Duration::from_secs(5), blocked_admit)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(sink.records().await.len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn reject_admission_fails_instead_of_blocking() {
    init_test_tracing();

    let blocking = BlockingSink::new();
    let (source, handle) = ManualSource::new();
    let mut pipeline = Pipeline::new(
        pipeline_config(1, AdmissionPolicy::Reject, FanoutPolicy::Blocking),
        source,
        vec![
            SinkSpec::new("blocked", Arc::new(blocking.clone()))
                .with_queue_capacity(1)
                .with_workers(1),
        ],
    );

    pipeline.start().await.unwrap();

    let write_entered = blocking.write_entered();
    handle.admit(test_record("vehicle-1", 0)).await.unwrap();
    write_entered.notified().await;

    let mut rejected = Vec::new();
    for offset in 1..=10 {
        if let Err(err) = handle.admit(test_record("vehicle-1", offset)).await {
            rejected.push(err.kind());
        }
    }

    assert!(!rejected.is_empty());
    assert!(rejected.iter().all(|kind| *kind == ErrorKind::QueueFull));

    blocking.unblock();
    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn independent_fanout_does_not_stall_other_sinks() {
    init_test_tracing();

    let blocking = BlockingSink::new();
    let slow = TestSinkWrapper::wrap(blocking.clone());
    let fast = memory_sink();
    let (source, handle) = ManualSource::new();
    let mut pipeline = Pipeline::new(
        pipeline_config(100, AdmissionPolicy::Block, FanoutPolicy::Independent),
        source,
        vec![
            SinkSpec::new("slow", Arc::new(slow.clone()))
                .with_queue_capacity(1)
                .with_workers(1),
            SinkSpec::new("fast", Arc::new(fast.clone())),
        ],
    );

    pipeline.start().await.unwrap();

    let fast_done = fast.wait_for_records(10).await;
    for record in test_records("vehicle-1", 10) {
        handle.admit(record).await.unwrap();
    }
    fast_done.notified().await;

    blocking.unblock();
    pipeline.shutdown_and_wait().await.unwrap();

    let slow_written = slow.records().await.len() as u64;
    let dispatcher = pipeline.dispatcher_stats();
    assert!(dispatcher.dropped > 0);
    assert_eq!(slow_written + dispatcher.dropped, 10);
    assert_eq!(pipeline.sink_stats("slow").unwrap().written, slow_written);
    assert_eq!(fast.records().await.len(), 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_go_to_the_dead_letter_sink() {
    init_test_tracing();

    let failing = FailingSink::failing_writes();
    let dead_letter = memory_sink();
    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 10,
        backoff_factor: 2.0,
    };
    let (mut pipeline, source) = create_pipeline(vec![
        SinkSpec::new("primary", Arc::new(failing.clone()))
            .with_retry(retry)
            .with_dead_letter(Arc::new(dead_letter.clone())),
    ]);

    pipeline.start().await.unwrap();
    assert!(dead_letter.connect_called().await);

    let dead_lettered = dead_letter.wait_for_records(2).await;
    source.admit(test_record("vehicle-1", 0)).await.unwrap();
    source.admit(test_record("vehicle-2", 0)).await.unwrap();
    dead_lettered.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    let stats = pipeline.sink_stats("primary").unwrap();
    assert_eq!(stats.written, 0);
    assert_eq!(stats.write_failures, 6);
    assert_eq!(stats.dead_lettered, 2);
    assert_eq!(stats.dropped, 0);
    assert_eq!(failing.write_attempts(), 6);
    assert!(dead_letter.shutdown_called().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_writes_are_dropped_and_the_pipeline_keeps_going() {
    init_test_tracing();

    let failing = FailingSink::failing_writes();
    let healthy = memory_sink();
    let (mut pipeline, source) = create_pipeline(vec![
        SinkSpec::new("failing", Arc::new(failing.clone())),
        SinkSpec::new("healthy", Arc::new(healthy.clone())),
    ]);

    pipeline.start().await.unwrap();

    let done = healthy.wait_for_records(5).await;
    for record in test_records("vehicle-1", 5) {
        source.admit(record).await.unwrap();
    }
    done.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    let stats = pipeline.sink_stats("failing").unwrap();
    assert_eq!(stats.dropped, 5);
    assert_eq!(stats.write_failures, 5);
    assert_eq!(failing.write_attempts(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn single_worker_preserves_order_of_the_same_id() {
    init_test_tracing();

    let sink = TestSinkWrapper::wrap(DelayFirstRecordSink);
    let (mut pipeline, source) = create_pipeline(vec![
        SinkSpec::new("ordered", Arc::new(sink.clone())).with_workers(1),
    ]);

    pipeline.start().await.unwrap();

    let done = sink.wait_for_records(2).await;
    source.admit(test_record("vehicle-1", 0)).await.unwrap();
    source.admit(test_record("vehicle-1", 1)).await.unwrap();
    done.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    let times: Vec<_> = sink
        .records()
        .await
        .into_iter()
        .map(|record| record.entry_time)
        .collect();
    assert_eq!(times, vec![time_at(0), time_at(1)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn multiple_workers_may_reorder_records_of_the_same_id() {
    init_test_tracing();

    let sink = TestSinkWrapper::wrap(DelayFirstRecordSink);
    let (mut pipeline, source) = create_pipeline(vec![
        SinkSpec::new("unordered", Arc::new(sink.clone())).with_workers(2),
    ]);

    pipeline.start().await.unwrap();

    let done = sink.wait_for_records(2).await;
    source.admit(test_record("vehicle-1", 0)).await.unwrap();
    source.admit(test_record("vehicle-1", 1)).await.unwrap();
    done.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    let times: Vec<_> = sink
        .records()
        .await
        .into_iter()
        .map(|record| record.entry_time)
        .collect();
    assert_eq!(times, vec![time_at(1), time_at(0)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn sink_connect_failure_aborts_startup() {
    init_test_tracing();

    let opened = memory_sink();
    let (mut pipeline, source) = create_pipeline(vec![
        SinkSpec::new("opened", Arc::new(opened.clone())),
        SinkSpec::new("broken", Arc::new(FailingSink::failing_connect())),
    ]);

    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SinkConnectionFailed);
    assert_eq!(pipeline.status(), PipelineStatus::Stopped);
    assert!(opened.shutdown_called().await);
    assert!(!source.is_connected());

    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn source_connect_failure_closes_sinks() {
    init_test_tracing();

    let sink = memory_sink();
    let (source, handle) = ManualSource::new();
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        source.fail_connect(),
        vec![SinkSpec::new("primary", Arc::new(sink.clone()))],
    );

    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
    assert_eq!(pipeline.status(), PipelineStatus::Stopped);
    assert!(sink.shutdown_called().await);
    assert!(handle.is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn source_start_failure_leaves_nothing_running() {
    init_test_tracing();

    let sink = memory_sink();
    let (source, handle) = ManualSource::new();
    let mut pipeline = Pipeline::new(
        PipelineConfig::default(),
        source.fail_start(),
        vec![SinkSpec::new("primary", Arc::new(sink.clone())).with_workers(4)],
    );

    let err = timeout(Duration::from_secs(5), pipeline.start())
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceError);
    assert_eq!(pipeline.status(), PipelineStatus::Stopped);
    assert!(sink.shutdown_called().await);
    assert!(handle.is_closed());
    assert!(pipeline.wait().await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn status_follows_the_lifecycle() {
    init_test_tracing();

    let (mut pipeline, _source) =
        create_pipeline(vec![SinkSpec::new("primary", Arc::new(memory_sink()))]);
    let mut status_rx = pipeline.status_rx();
    assert_eq!(pipeline.status(), PipelineStatus::Idle);

    // Waiting on a pipeline that never started is a no-op and keeps it startable.
    pipeline.wait().await.unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Idle);

    pipeline.start().await.unwrap();
    assert_eq!(*status_rx.borrow_and_update(), PipelineStatus::Running);

    pipeline.shutdown();
    assert_eq!(pipeline.status(), PipelineStatus::Stopping);

    pipeline.wait().await.unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Stopped);

    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn sink_shutdown_failure_does_not_fail_the_pipeline() {
    init_test_tracing();

    let failing = FailingSink::failing_shutdown();
    let (mut pipeline, _source) =
        create_pipeline(vec![SinkSpec::new("primary", Arc::new(failing.clone()))]);

    pipeline.start().await.unwrap();
    pipeline.shutdown_and_wait().await.unwrap();

    assert!(failing.shutdown_called());
    assert_eq!(pipeline.status(), PipelineStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_sink_lists_are_rejected() {
    init_test_tracing();

    let (mut pipeline, _source) = create_pipeline(Vec::new());
    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);

    let (mut pipeline, _source) = create_pipeline(vec![
        SinkSpec::new("primary", Arc::new(memory_sink())),
        SinkSpec::new("primary", Arc::new(memory_sink())),
    ]);
    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(err.detail(), Some("primary"));
}
