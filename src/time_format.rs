//! UTC "tempo" formatting shared by the tick publisher (§6 wire format) and
//! the violations CSV sink (§6 CSV format): `"YYYY-MM-DD HH:MM:SS.mmm"`.

use chrono::{DateTime, Utc};

fn to_datetime(epoch: f64) -> DateTime<Utc> {
    let secs = epoch.floor() as i64;
    let subsec_nanos = ((epoch - epoch.floor()) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(secs, subsec_nanos).unwrap_or(DateTime::UNIX_EPOCH)
}

pub fn format_epoch_utc_millis(epoch: f64) -> String {
    to_datetime(epoch).format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

/// Full-microsecond stamp, used by the report sink to match
/// `infra/sinks.py::PrintSink`'s `%Y-%m-%d %H:%M:%S.%f` (Python's `%f` is
/// always 6 digits). Distinct from [`format_epoch_utc_millis`], which is the
/// wire/CSV format §6 pins to 3 digits.
pub fn format_epoch_utc_micros(epoch: f64) -> String {
    to_datetime(epoch).format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_second_boundary() {
        // 1970-01-01T00:00:00Z + 1001s
        assert_eq!(format_epoch_utc_millis(1001.0), "1970-01-01 00:16:41.000");
    }

    #[test]
    fn formats_fractional_millis() {
        assert_eq!(format_epoch_utc_millis(1001.1234), "1970-01-01 00:16:41.123");
    }

    #[test]
    fn formats_full_microseconds() {
        assert_eq!(format_epoch_utc_micros(1001.123456), "1970-01-01 00:16:41.123456");
    }

    #[test]
    fn formats_whole_second_boundary_micros() {
        assert_eq!(format_epoch_utc_micros(1001.0), "1970-01-01 00:16:41.000000");
    }
}
