use chrono::{DateTime, TimeZone, Utc};

use crate::types::Record;

/// Base of the logical times used by [`test_record`].
pub const BASE_TIMESTAMP: i64 = 1_700_000_000;

/// Returns `BASE_TIMESTAMP + offset_secs` as a timestamp.
pub fn time_at(offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_TIMESTAMP + offset_secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Builds a record for `id` at `time_at(offset_secs)` with a healthy capacity.
pub fn test_record(id: &str, offset_secs: i64) -> Record {
    Record {
        id: id.to_string(),
        entry_time: time_at(offset_secs),
        voltage: 48.2,
        current: 3.5,
        capacity: 80.0,
        power: 168,
        temperature: 31.5,
        soc: 76,
        internal_resistance: 0.25,
    }
}

/// Builds `count` records for one device with consecutive logical times.
pub fn test_records(id: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| test_record(id, i as i64))
        .collect()
}

/// Encodes a record the way a device publishes it.
pub fn record_payload(record: &Record) -> Vec<u8> {
    record.to_json_bytes().unwrap_or_default()
}
