use chrono::{DateTime, SecondsFormat, Utc};

/// Formats a unix timestamp (seconds) as ISO-8601 with millisecond precision, e.g.
/// `2022-10-31T00:00:00.000Z`. Out-of-range values clamp to the unix epoch.
pub fn iso8601_from_unix(secs: u64) -> String {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso8601_millis() {
        assert_eq!(iso8601_from_unix(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso8601_from_unix(1_667_174_400), "2022-10-31T00:00:00.000Z");
    }

    #[test]
    fn test_iso8601_clamps_out_of_range() {
        assert_eq!(iso8601_from_unix(u64::MAX), "1970-01-01T00:00:00.000Z");
    }
}
