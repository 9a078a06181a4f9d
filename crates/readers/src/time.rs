//! Source-platform time conversion.
//!
//! The source platform stamps records in microseconds since 1899-12-30
//! UTC (the old spreadsheet epoch). Everything downstream uses Unix
//! microseconds.

use tickalign_core::TimestampUs;

/// Microseconds between 1899-12-30 and 1970-01-01 (25,569 days).
pub const SC_TO_UNIX_US: i64 = 2_209_161_600_000_000;

/// Convert a source-epoch timestamp to Unix microseconds.
#[inline]
pub fn sc_us_to_unix_us(sc_us: i64) -> TimestampUs {
    sc_us - SC_TO_UNIX_US
}

/// Convert Unix microseconds to a source-epoch timestamp.
#[inline]
pub fn unix_us_to_sc_us(unix_us: TimestampUs) -> i64 {
    unix_us + SC_TO_UNIX_US
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_offset() {
        // the Unix epoch itself, expressed in source time
        assert_eq!(sc_us_to_unix_us(SC_TO_UNIX_US), 0);
        assert_eq!(unix_us_to_sc_us(0), SC_TO_UNIX_US);
    }

    #[test]
    fn test_roundtrip() {
        let unix_us = 1_756_252_799_123_456i64;
        assert_eq!(sc_us_to_unix_us(unix_us_to_sc_us(unix_us)), unix_us);
    }

    #[test]
    fn test_known_instant() {
        // 2025-08-26 00:00:00 UTC
        let unix_us = 1_756_166_400_000_000i64;
        let sc_us = unix_us_to_sc_us(unix_us);
        assert_eq!(sc_us, unix_us + 2_209_161_600_000_000);
        let date = tickalign_core::ts_to_date(sc_us_to_unix_us(sc_us));
        assert_eq!(date, chrono::NaiveDate::from_ymd_opt(2025, 8, 26).unwrap());
    }
}
