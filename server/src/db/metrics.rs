use chrono::{DateTime, Utc};
use fameboard_shared::boards::MetricSeries;
use sqlx::PgPool;

/// Bucketing for the metrics read endpoint: `date_trunc` unit plus lookback
/// window (`None` means the full series).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Week,
    Month,
    Year,
    All,
}

impl Granularity {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "1w" => Some(Granularity::Week),
            "1m" => Some(Granularity::Month),
            "1y" => Some(Granularity::Year),
            "all" => Some(Granularity::All),
            _ => None,
        }
    }

    fn bucket(self) -> &'static str {
        match self {
            Granularity::Week => "hour",
            Granularity::Month => "day",
            Granularity::Year => "week",
            Granularity::All => "month",
        }
    }

    fn window(self) -> Option<&'static str> {
        match self {
            Granularity::Week => Some("7 days"),
            Granularity::Month => Some("30 days"),
            Granularity::Year => Some("365 days"),
            Granularity::All => None,
        }
    }
}

/// Inserts one row per pipeline counter. The player_polls counters share a
/// scan via FILTER clauses.
pub async fn insert_counters(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO metrics (metric, ts, value) \
         SELECT 'players_total', now(), COUNT(*)::DOUBLE PRECISION FROM player_polls \
         UNION ALL \
         SELECT 'players_ready_to_poll', now(), \
         (COUNT(*) FILTER (WHERE next_poll_at <= now()))::DOUBLE PRECISION FROM player_polls \
         UNION ALL \
         SELECT 'players_with_errors', now(), \
         (COUNT(*) FILTER (WHERE error_count >= 1))::DOUBLE PRECISION FROM player_polls \
         UNION ALL \
         SELECT 'snapshots_total', now(), COUNT(*)::DOUBLE PRECISION FROM player_stats_snapshots \
         UNION ALL \
         SELECT 'battles_total', now(), COUNT(*)::DOUBLE PRECISION FROM battle_summary",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn series(
    pool: &PgPool,
    metric: &str,
    granularity: Granularity,
) -> Result<MetricSeries, sqlx::Error> {
    let rows: Vec<(DateTime<Utc>, f64)> = match granularity.window() {
        Some(window) => {
            sqlx::query_as(
                "SELECT date_trunc($2, ts) AS bucket, AVG(value) \
                 FROM metrics \
                 WHERE metric = $1 AND ts >= now() - $3::INTERVAL \
                 GROUP BY bucket ORDER BY bucket",
            )
            .bind(metric)
            .bind(granularity.bucket())
            .bind(window)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT date_trunc($2, ts) AS bucket, AVG(value) \
                 FROM metrics \
                 WHERE metric = $1 \
                 GROUP BY bucket ORDER BY bucket",
            )
            .bind(metric)
            .bind(granularity.bucket())
            .fetch_all(pool)
            .await?
        }
    };

    let mut series = MetricSeries::default();
    for (bucket, value) in rows {
        series.timestamps.push(bucket.timestamp_millis());
        series.values.push(value);
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::Granularity;

    #[test]
    fn parses_known_granularities() {
        assert_eq!(Granularity::parse("1w"), Some(Granularity::Week));
        assert_eq!(Granularity::parse("1m"), Some(Granularity::Month));
        assert_eq!(Granularity::parse("1y"), Some(Granularity::Year));
        assert_eq!(Granularity::parse("all"), Some(Granularity::All));
        assert_eq!(Granularity::parse("2d"), None);
    }

    #[test]
    fn buckets_narrow_with_the_window() {
        assert_eq!(Granularity::Week.bucket(), "hour");
        assert_eq!(Granularity::Month.bucket(), "day");
        assert_eq!(Granularity::Year.bucket(), "week");
        assert_eq!(Granularity::All.bucket(), "month");
        assert_eq!(Granularity::All.window(), None);
    }
}
