//! Chapter timestamp formatting.
//!
//! YouTube recognizes chapter lines that start with `M:SS` or `H:MM:SS`.

/// Format whole seconds as `H:MM:SS` (one hour or more) or `M:SS`.
///
/// # Examples
/// ```
/// use chap_models::timestamp::format_timestamp;
/// assert_eq!(format_timestamp(0), "0:00");
/// assert_eq!(format_timestamp(125), "2:05");
/// assert_eq!(format_timestamp(3725), "1:02:05");
/// ```
pub fn format_timestamp(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Parse a `M:SS` / `H:MM:SS` chapter timestamp back to whole seconds.
pub fn parse_timestamp(ts: &str) -> Option<u64> {
    let parts: Vec<&str> = ts.trim().split(':').collect();
    let nums: Option<Vec<u64>> = parts.iter().map(|p| p.parse::<u64>().ok()).collect();
    let nums = nums?;

    match nums.as_slice() {
        [m, s] if *s < 60 => Some(m * 60 + s),
        [h, m, s] if *m < 60 && *s < 60 => Some(h * 3600 + m * 60 + s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_under_one_hour() {
        assert_eq!(format_timestamp(59), "0:59");
        assert_eq!(format_timestamp(600), "10:00");
        assert_eq!(format_timestamp(3599), "59:59");
    }

    #[test]
    fn test_format_over_one_hour() {
        assert_eq!(format_timestamp(3600), "1:00:00");
        assert_eq!(format_timestamp(36_061), "10:01:01");
    }

    #[test]
    fn test_parse_matches_format() {
        for secs in [0, 9, 61, 3599, 3600, 7384] {
            assert_eq!(parse_timestamp(&format_timestamp(secs)), Some(secs));
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_timestamp("1:75"), None);
        assert_eq!(parse_timestamp("abc"), None);
        assert_eq!(parse_timestamp("12"), None);
    }
}
