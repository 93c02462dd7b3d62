use chrono::{DateTime, Utc};
use fameboard_shared::Region;
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Scheduling row for one player: when to poll next, consecutive error
/// count, and the three activity timestamps the scheduler draws from.
#[derive(Debug, Clone)]
pub struct PlayerPoll {
    pub region: Region,
    pub player_id: String,
    pub next_poll_at: DateTime<Utc>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub error_count: i32,
    pub last_encountered: Option<DateTime<Utc>>,
    pub killboard_last_activity: Option<DateTime<Utc>>,
    pub other_last_activity: Option<DateTime<Utc>>,
}

type DueRow = (
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    i32,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

pub async fn fetch_due(
    pool: &PgPool,
    region: Region,
    batch_size: i64,
) -> Result<Vec<PlayerPoll>, sqlx::Error> {
    let rows: Vec<DueRow> = sqlx::query_as(
        "SELECT player_id, next_poll_at, last_poll_at, error_count, \
         last_encountered, killboard_last_activity, other_last_activity \
         FROM player_polls \
         WHERE region = $1 AND next_poll_at <= now() \
         ORDER BY next_poll_at ASC \
         LIMIT $2",
    )
    .bind(region.as_str())
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(
                player_id,
                next_poll_at,
                last_poll_at,
                error_count,
                last_encountered,
                killboard_last_activity,
                other_last_activity,
            )| PlayerPoll {
                region,
                player_id,
                next_poll_at,
                last_poll_at,
                error_count,
                last_encountered,
                killboard_last_activity,
                other_last_activity,
            },
        )
        .collect())
}

/// Bulk upsert for killboard discovery. Discovery may only advance the next
/// poll time, never delay it: the conflict clause takes the least of the
/// existing schedule and `last_poll_at + 12h` (coalescing to the discovery
/// time for rows that have never been polled).
pub async fn upsert_discovered(pool: &PgPool, rows: &[PlayerPoll]) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = discovery_upsert(rows);
    builder.build().execute(pool).await?;
    Ok(())
}

fn discovery_upsert(rows: &[PlayerPoll]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO player_polls \
         (region, player_id, next_poll_at, last_poll_at, error_count, \
          last_encountered, killboard_last_activity, other_last_activity) ",
    );
    push_poll_values(&mut builder, rows);
    builder.push(
        " ON CONFLICT (region, player_id) DO UPDATE SET \
         killboard_last_activity = excluded.killboard_last_activity, \
         next_poll_at = LEAST(\
         COALESCE(player_polls.last_poll_at + INTERVAL '12 hours', excluded.next_poll_at), \
         player_polls.next_poll_at)",
    );
    builder
}

/// Bulk upsert after successful polls. Only the scheduling fields are
/// written; the activity timestamps merge forward with GREATEST so a
/// killboard update that landed mid-batch is never regressed.
pub async fn update_polled(pool: &PgPool, rows: &[PlayerPoll]) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO player_polls \
         (region, player_id, next_poll_at, last_poll_at, error_count, \
          last_encountered, killboard_last_activity, other_last_activity) ",
    );
    push_poll_values(&mut builder, rows);
    builder.push(
        " ON CONFLICT (region, player_id) DO UPDATE SET \
         next_poll_at = excluded.next_poll_at, \
         last_poll_at = excluded.last_poll_at, \
         error_count = excluded.error_count, \
         other_last_activity = excluded.other_last_activity, \
         killboard_last_activity = GREATEST(\
         player_polls.killboard_last_activity, excluded.killboard_last_activity), \
         last_encountered = GREATEST(\
         player_polls.last_encountered, excluded.last_encountered)",
    );
    builder.build().execute(pool).await?;
    Ok(())
}

/// Bulk upsert after failed polls: only the error count and the backed-off
/// schedule change.
pub async fn update_failures(pool: &PgPool, rows: &[PlayerPoll]) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO player_polls \
         (region, player_id, next_poll_at, last_poll_at, error_count, \
          last_encountered, killboard_last_activity, other_last_activity) ",
    );
    push_poll_values(&mut builder, rows);
    builder.push(
        " ON CONFLICT (region, player_id) DO UPDATE SET \
         error_count = excluded.error_count, \
         next_poll_at = excluded.next_poll_at",
    );
    builder.build().execute(pool).await?;
    Ok(())
}

pub async fn delete(
    pool: &PgPool,
    region: Region,
    player_ids: &[String],
) -> Result<(), sqlx::Error> {
    if player_ids.is_empty() {
        return Ok(());
    }
    sqlx::query("DELETE FROM player_polls WHERE region = $1 AND player_id = ANY($2)")
        .bind(region.as_str())
        .bind(player_ids)
        .execute(pool)
        .await?;
    Ok(())
}

fn push_poll_values<'args>(
    builder: &mut QueryBuilder<'args, Postgres>,
    rows: &'args [PlayerPoll],
) {
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.region.as_str())
            .push_bind(&row.player_id)
            .push_bind(row.next_poll_at)
            .push_bind(row.last_poll_at)
            .push_bind(row.error_count)
            .push_bind(row.last_encountered)
            .push_bind(row.killboard_last_activity)
            .push_bind(row.other_last_activity);
    });
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use fameboard_shared::Region;

    use super::{PlayerPoll, discovery_upsert};

    fn poll(player_id: &str) -> PlayerPoll {
        PlayerPoll {
            region: Region::Europe,
            player_id: player_id.to_string(),
            next_poll_at: Utc::now(),
            last_poll_at: None,
            error_count: 0,
            last_encountered: None,
            killboard_last_activity: Some(Utc::now()),
            other_last_activity: None,
        }
    }

    #[test]
    fn discovery_conflict_clause_only_advances_the_schedule() {
        let rows = [poll("a"), poll("b")];
        let builder = discovery_upsert(&rows);
        let sql = builder.sql();
        assert!(sql.contains("ON CONFLICT (region, player_id) DO UPDATE"));
        assert!(sql.contains(
            "LEAST(COALESCE(player_polls.last_poll_at + INTERVAL '12 hours', \
             excluded.next_poll_at), player_polls.next_poll_at)"
        ));
        // Eight columns bound per row.
        assert_eq!(sql.matches('$').count(), 16);
    }
}
