//! Timestamp helpers for the persistence header and control responses.
//!
//! The on-disk header stores nanoseconds since the Unix epoch; control
//! responses render wall-clock instants as ISO-8601 UTC strings.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch, saturating at zero for clocks set
/// before 1970.
pub fn epoch_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Format a wall-clock instant as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_iso8601(t: SystemTime) -> String {
    let secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let (year, month, day) = civil_from_days(secs / 86400);
    let of_day = secs % 86400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        of_day / 3600,
        (of_day / 60) % 60,
        of_day % 60
    )
}

/// Proleptic Gregorian date for a day count since 1970-01-01.
///
/// Era arithmetic: the day count is rebased to 0000-03-01 so every leap
/// day falls at the end of a year and each 400-year era spans exactly
/// 146097 days, which turns the whole conversion into integer division.
/// No leap second handling.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let rebased = days + 719468;
    let era = rebased / 146097;
    let day_of_era = rebased % 146097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36524 - day_of_era / 146096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);

    // March-based month index: 0 = March .. 11 = February.
    let month_index = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * month_index + 2) / 5 + 1;
    let month = if month_index < 10 {
        month_index + 3
    } else {
        month_index - 9
    };
    let year = year_of_era + era * 400 + u64::from(month <= 2);

    (year, month, day)
}

/// Epoch instant for a given second count, for tests and reconstruction.
pub fn system_time_from_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_iso8601_epoch() {
        assert_eq!(format_iso8601(UNIX_EPOCH), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_format_iso8601_known_date() {
        // 2000-01-01 00:00:00 UTC = 946684800
        let t = system_time_from_secs(946684800);
        assert_eq!(format_iso8601(t), "2000-01-01T00:00:00Z");
    }

    #[test]
    fn test_format_iso8601_time_of_day() {
        // 2026-02-15 01:30:05 UTC = 1771119005
        let t = system_time_from_secs(1771119005);
        assert_eq!(format_iso8601(t), "2026-02-15T01:30:05Z");
    }

    #[test]
    fn test_civil_from_days_epoch() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
    }

    #[test]
    fn test_civil_from_days_leap_boundaries() {
        // 2000-02-29 = day 11016; 2100 is not a leap year.
        assert_eq!(civil_from_days(11016), (2000, 2, 29));
        assert_eq!(civil_from_days(47540), (2100, 2, 28));
        assert_eq!(civil_from_days(47541), (2100, 3, 1));
    }

    #[test]
    fn test_civil_from_days_is_consistent_with_day_arithmetic() {
        // Month lengths reconstructed from consecutive day counts must sum
        // to a full year across a leap year.
        let mut firsts = 0;
        for day in 11200..11200 + 366 {
            let (_, _, day_of_month) = civil_from_days(day);
            if day_of_month == 1 {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 12);
    }

    #[test]
    fn test_epoch_nanos_is_positive() {
        assert!(epoch_nanos() > 0);
    }
}
