//! Metric names and labels emitted by the pipeline.

/// Label for the sink name.
pub const SINK_LABEL: &str = "sink";

/// Label for the source kind (`push` or `poll`).
pub const SOURCE_LABEL: &str = "source";

/// Label for why a record was dropped.
pub const REASON_LABEL: &str = "reason";

/// Label for the result of a poll cycle.
pub const OUTCOME_LABEL: &str = "outcome";

// Source metrics

/// Counter of messages delivered by the broker.
pub const CDC_SOURCE_MESSAGES_RECEIVED_TOTAL: &str = "cdc_source_messages_received_total";

/// Counter of messages acknowledged to the broker.
pub const CDC_SOURCE_MESSAGES_ACKED_TOTAL: &str = "cdc_source_messages_acked_total";

/// Counter of records admitted into the ingestion queue.
pub const CDC_SOURCE_RECORDS_ENQUEUED_TOTAL: &str = "cdc_source_records_enqueued_total";

/// Counter of inputs dropped by a source, labelled by [`REASON_LABEL`].
pub const CDC_SOURCE_RECORDS_DROPPED_TOTAL: &str = "cdc_source_records_dropped_total";

/// Counter of change-log poll cycles, labelled by [`OUTCOME_LABEL`].
pub const CDC_POLL_CYCLES_TOTAL: &str = "cdc_poll_cycles_total";

/// Gauge of the change-log watermark as unix seconds.
pub const CDC_POLL_WATERMARK_SECONDS: &str = "cdc_poll_watermark_seconds";

// Dispatcher metrics

/// Counter of records read from the ingestion queue.
pub const CDC_DISPATCHER_RECORDS_TOTAL: &str = "cdc_dispatcher_records_total";

/// Counter of records not delivered to a sink queue because it was full or closed.
pub const CDC_DISPATCHER_DROPPED_TOTAL: &str = "cdc_dispatcher_dropped_total";

/// Counter of queued records evicted to make room for newer ones.
pub const CDC_DISPATCHER_EVICTED_TOTAL: &str = "cdc_dispatcher_evicted_total";

// Sink metrics

/// Counter of records written successfully.
pub const CDC_SINK_RECORDS_WRITTEN_TOTAL: &str = "cdc_sink_records_written_total";

/// Counter of failed write attempts, including timed out ones.
pub const CDC_SINK_WRITE_FAILURES_TOTAL: &str = "cdc_sink_write_failures_total";

/// Counter of records given up on after all attempts.
pub const CDC_SINK_RECORDS_DROPPED_TOTAL: &str = "cdc_sink_records_dropped_total";

/// Counter of records handed to the dead-letter sink.
pub const CDC_SINK_RECORDS_DEAD_LETTERED_TOTAL: &str = "cdc_sink_records_dead_lettered_total";

/// Histogram of successful write durations in seconds.
pub const CDC_SINK_WRITE_DURATION_SECONDS: &str = "cdc_sink_write_duration_seconds";

/// Counter of low capacity alerts.
pub const CDC_ALERTS_EMITTED_TOTAL: &str = "cdc_alerts_emitted_total";
