//! Elapsed time formatting for pipeline summaries

use std::time::Duration;

/// Format a duration as `"H hours, M minutes, S seconds"`
///
/// Hours are not wrapped at a day boundary.
///
/// # Examples
///
/// ```
/// use emu_common::human_time::format_elapsed;
/// use std::time::Duration;
///
/// assert_eq!(format_elapsed(Duration::from_secs(3725)), "1 hours, 2 minutes, 5 seconds");
/// assert_eq!(format_elapsed(Duration::from_secs(59)), "0 hours, 0 minutes, 59 seconds");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{} hours, {} minutes, {} seconds", hours, minutes, seconds)
}

/// Result folder timestamp, `YYYYmmdd_HHMMSSffffff`
pub fn folder_timestamp(at: chrono::DateTime<chrono::Local>) -> String {
    at.format("%Y%m%d_%H%M%S%6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_elapsed_spans_days() {
        assert_eq!(
            format_elapsed(Duration::from_secs(26 * 3600 + 61)),
            "26 hours, 1 minutes, 1 seconds"
        );
        assert_eq!(format_elapsed(Duration::from_millis(999)), "0 hours, 0 minutes, 0 seconds");
    }

    #[test]
    fn test_folder_timestamp_has_microseconds() {
        let at = chrono::Local
            .with_ymd_and_hms(2024, 3, 7, 9, 5, 2)
            .unwrap()
            + chrono::Duration::microseconds(42);
        assert_eq!(folder_timestamp(at), "20240307_090502000042");
    }
}
