//! Replication protocol timestamps: microseconds since 2000-01-01 00:00:00 UTC.

use chrono::{DateTime, Utc};

/// Seconds between the Unix epoch and the PostgreSQL epoch.
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Current time as a protocol timestamp.
pub fn now() -> i64 {
    from_datetime(Utc::now())
}

pub fn from_datetime(dt: DateTime<Utc>) -> i64 {
    (dt.timestamp() - PG_EPOCH_OFFSET_SECS) * 1_000_000 + i64::from(dt.timestamp_subsec_micros())
}

/// Format a protocol timestamp as ISO-8601 for logging.
pub fn format(micros: i64) -> String {
    let unix_secs = micros.div_euclid(1_000_000) + PG_EPOCH_OFFSET_SECS;
    let nanos = (micros.rem_euclid(1_000_000) * 1000) as u32;

    DateTime::from_timestamp(unix_secs, nanos)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string())
        .unwrap_or_else(|| format!("{}us", micros))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_is_zero() {
        let epoch = DateTime::from_timestamp(PG_EPOCH_OFFSET_SECS, 0).unwrap();
        assert_eq!(from_datetime(epoch), 0);
        assert_eq!(format(0), "2000-01-01T00:00:00.000000Z");
    }

    #[test]
    fn test_format_keeps_micros() {
        assert_eq!(format(1_500_000), "2000-01-01T00:00:01.500000Z");
        assert_eq!(format(-1), "1999-12-31T23:59:59.999999Z");
    }

    #[test]
    fn test_now_is_after_2020() {
        // 2020-01-01 is 20 years of microseconds past the protocol epoch.
        assert!(now() > 631_152_000_000_000);
    }
}
