use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

// Get current timestamp in milliseconds
pub fn get_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Hours elapsed from `start` to `end`, zero if the clock went backwards
pub fn hours_between(start: Timestamp, end: Timestamp) -> f64 {
    end.saturating_sub(start) as f64 / MILLIS_PER_HOUR
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_timestamp_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(get_timestamp() > 1_577_836_800_000);
    }

    #[test]
    fn test_hours_between() {
        assert_approx_eq!(hours_between(0, 3_600_000), 1.0);
        assert_approx_eq!(hours_between(1_000, 1_000 + 90 * 60 * 1000), 1.5);
        assert_eq!(hours_between(5_000, 1_000), 0.0);
    }
}
