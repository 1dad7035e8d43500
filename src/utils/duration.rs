//! Duration parsing utilities.
//!
//! Parses the short duration strings accepted on the command line
//! (e.g. "100ms", "2s") into a [`Duration`].

use std::time::Duration;

/// Parse a duration string (e.g. "100ms", "2s", "1m") into a [`Duration`]
///
/// Supports:
/// - Raw milliseconds: "250"
/// - Milliseconds: "250ms", "250msec", "250millis"
/// - Seconds: "2s", "2sec", "2secs", "2second", "2seconds"
/// - Minutes: "1m", "1min", "1mins", "1minute", "1minutes"
/// - Hours: "1h", "1hr", "1hrs", "1hour", "1hours"
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use routetable_ipam::utils::duration::parse_duration;
///
/// assert_eq!(parse_duration("250"), Ok(Duration::from_millis(250)));
/// assert_eq!(parse_duration("100ms"), Ok(Duration::from_millis(100)));
/// assert_eq!(parse_duration("2s"), Ok(Duration::from_secs(2)));
/// assert!(parse_duration("soon").is_err());
/// ```
pub fn parse_duration(duration: &str) -> Result<Duration, String> {
    let duration = duration.trim();
    let (number, unit) = split_number_part(duration);

    let invalid = || format!("Invalid duration format: {}", duration);
    let value = number.parse::<u64>().map_err(|_| invalid())?;

    match unit {
        "" | "ms" | "msec" | "msecs" | "millis" => Ok(Duration::from_millis(value)),
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "m" | "min" | "mins" | "minute" | "minutes" => {
            value.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid)
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            value.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

/// Split at the first non-digit character
fn split_number_part(duration: &str) -> (&str, &str) {
    let end = duration
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(duration.len());
    duration.split_at(end)
}
