use chrono::{DateTime, Duration, Utc};

/// Raised when a poll row carries no activity timestamp at all; usually a
/// discovery row raced ahead of its killboard activity write. The caller
/// treats this as a transient per-player failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no activity timestamps available for player")]
pub struct NoActivity;

/// Picks the next poll time from the most recent of the three activity
/// timestamps. The staler a player, the less often it is polled:
///
/// | staleness | delay |
/// |-----------|-------|
/// | <= 24h    | 6h    |
/// | <= 7d     | 24h   |
/// | <= 30d    | 48h   |
/// | > 30d     | 30d   |
pub fn next_poll_at(
    last_encountered: Option<DateTime<Utc>>,
    killboard_last_activity: Option<DateTime<Utc>>,
    other_last_activity: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, NoActivity> {
    let most_recent = [last_encountered, killboard_last_activity, other_last_activity]
        .into_iter()
        .flatten()
        .max()
        .ok_or(NoActivity)?;

    let staleness = now - most_recent;
    let delay = if staleness <= Duration::hours(24) {
        Duration::hours(6)
    } else if staleness <= Duration::days(7) {
        Duration::hours(24)
    } else if staleness <= Duration::days(30) {
        Duration::hours(48)
    } else {
        Duration::days(30)
    };
    Ok(now + delay)
}

/// Exponential backoff after `error_count` consecutive failures:
/// 15s * 2^min(n, 6), capped at 24 hours. The shift clamp keeps the
/// doubling from overflowing and bounds any single wait at one day.
pub fn failure_backoff(error_count: i32) -> Duration {
    let shift = error_count.clamp(0, 6) as u32;
    let backoff = Duration::seconds(15i64 << shift);
    backoff.min(Duration::hours(24))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::{NoActivity, failure_backoff, next_poll_at};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("test timestamp should parse")
    }

    #[test]
    fn active_within_a_day_polls_in_six_hours() {
        let now = ts("2024-01-01T00:10:00Z");
        let activity = ts("2024-01-01T00:00:00Z");
        let next = next_poll_at(None, None, Some(activity), now).expect("activity present");
        assert_eq!(next, now + Duration::hours(6));
    }

    #[test]
    fn staleness_tiers_match_the_table() {
        let now = ts("2024-06-01T00:00:00Z");
        let cases = [
            (Duration::hours(23), Duration::hours(6)),
            (Duration::hours(24), Duration::hours(6)),
            (Duration::hours(25), Duration::hours(24)),
            (Duration::days(7), Duration::hours(24)),
            (Duration::days(7) + Duration::seconds(1), Duration::hours(48)),
            (Duration::days(30), Duration::hours(48)),
            (Duration::days(31), Duration::days(30)),
            (Duration::days(400), Duration::days(30)),
        ];
        for (staleness, expected_delay) in cases {
            let next = next_poll_at(None, Some(now - staleness), None, now)
                .expect("activity present");
            assert_eq!(
                next,
                now + expected_delay,
                "staleness {staleness} should map to delay {expected_delay}"
            );
        }
    }

    #[test]
    fn most_recent_of_the_three_timestamps_wins() {
        let now = ts("2024-06-01T00:00:00Z");
        let next = next_poll_at(
            Some(now - Duration::days(40)),
            Some(now - Duration::days(10)),
            Some(now - Duration::hours(2)),
            now,
        )
        .expect("activity present");
        // 2h staleness lands in the 6h tier despite the two stale signals.
        assert_eq!(next, now + Duration::hours(6));
    }

    #[test]
    fn all_null_activity_is_an_error() {
        let now = Utc::now();
        assert_eq!(next_poll_at(None, None, None, now), Err(NoActivity));
    }

    #[test]
    fn backoff_doubles_from_fifteen_seconds() {
        assert_eq!(failure_backoff(0), Duration::seconds(15));
        assert_eq!(failure_backoff(1), Duration::seconds(30));
        assert_eq!(failure_backoff(3), Duration::seconds(120));
        assert_eq!(failure_backoff(6), Duration::seconds(960));
    }

    #[test]
    fn backoff_shift_clamps_at_six() {
        assert_eq!(failure_backoff(7), failure_backoff(6));
        assert_eq!(failure_backoff(1000), failure_backoff(6));
        assert_eq!(failure_backoff(-3), Duration::seconds(15));
    }

    #[test]
    fn backoff_never_exceeds_one_day() {
        for n in 0..64 {
            assert!(failure_backoff(n) <= Duration::hours(24));
        }
    }
}
