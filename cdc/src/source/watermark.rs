use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Highest logical time known to be fully processed by a poll source.
///
/// The value only ever moves forward. It is kept as nanoseconds since the epoch, so times
/// outside 1677..2262 are clamped to those bounds.
#[derive(Debug)]
pub struct Watermark {
    nanos: AtomicI64,
}

impl Watermark {
    pub fn new(initial: DateTime<Utc>) -> Self {
        Self {
            nanos: AtomicI64::new(to_nanos(initial)),
        }
    }

    pub fn current(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.nanos.load(Ordering::Acquire))
    }

    /// Moves the watermark to `to` if that is later than the current value.
    ///
    /// Returns whether the watermark changed.
    pub fn advance(&self, to: DateTime<Utc>) -> bool {
        let to = to_nanos(to);
        self.nanos.fetch_max(to, Ordering::AcqRel) < to
    }
}

fn to_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(if time.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn never_moves_backwards() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let watermark = Watermark::new(start);

        assert!(!watermark.advance(start));
        assert!(!watermark.advance(start - chrono::Duration::seconds(1)));
        assert_eq!(watermark.current(), start);

        let later = start + chrono::Duration::seconds(5);
        assert!(watermark.advance(later));
        assert_eq!(watermark.current(), later);
    }

    #[test]
    fn keeps_sub_second_precision() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let watermark = Watermark::new(start);

        let later = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert!(watermark.advance(later));
        assert_eq!(watermark.current(), later);
    }

    #[test]
    fn times_before_the_representable_range_are_clamped() {
        let watermark = Watermark::new(DateTime::<Utc>::MIN_UTC);

        assert_eq!(watermark.current(), DateTime::from_timestamp_nanos(i64::MIN));
        assert!(watermark.advance(Utc.timestamp_opt(0, 0).unwrap()));
    }
}
