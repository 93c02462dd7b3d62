use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fameboard_shared::Region;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{self, PLAYER_POLL_TICK_SECS};
use crate::db::player_polls::{self, PlayerPoll};
use crate::db::player_stats::{self, PlayerStatsRecord};
use crate::scheduler;
use crate::state::AppState;
use crate::upstream::{PlayerRecord, UpstreamError};

/// Result of polling one player. A batch is partitioned into deletions,
/// successes and failures before anything is written.
#[derive(Debug)]
pub enum PollOutcome {
    /// 404 upstream, or a payload without a lifetime timestamp: the player
    /// is dropped from polling entirely.
    Delete { player_id: String },
    Success {
        poll: PlayerPoll,
        stats: Box<PlayerStatsRecord>,
    },
    Failure { poll: PlayerPoll },
}

/// Selects due players once a second and fans them out over a fixed worker
/// pool. A batch is all-fetched, then all-written: no DB write starts until
/// every worker has drained.
pub async fn run(state: AppState, region: Region, cancel: CancellationToken) {
    let batch_size = config::player_batch();
    let worker_count = config::player_workers();
    info!(%region, batch_size, worker_count, "player polling started");

    let mut interval = tokio::time::interval(Duration::from_secs(PLAYER_POLL_TICK_SECS));
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!(%region, "player poller stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        run_batch(&state, region, batch_size, worker_count, &cancel).await;
    }
}

async fn run_batch(
    state: &AppState,
    region: Region,
    batch_size: i64,
    worker_count: usize,
    cancel: &CancellationToken,
) {
    let rows = match player_polls::fetch_due(&state.db, region, batch_size).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(%region, error = %e, "failed to select players to poll");
            return;
        }
    };
    if rows.is_empty() {
        tokio::time::sleep(Duration::from_secs(1)).await;
        return;
    }

    info!(%region, batch = rows.len(), "polling player batch");
    let outcomes = execute_batch(state, region, rows, worker_count, cancel).await;
    apply_outcomes(state, region, outcomes).await;
}

/// Fixed pool of workers pulling jobs from one shared channel. Effective
/// throughput is min(worker_count, regional rate limit). Returns once all
/// workers have exited and every result is collected.
async fn execute_batch(
    state: &AppState,
    region: Region,
    rows: Vec<PlayerPoll>,
    worker_count: usize,
    cancel: &CancellationToken,
) -> Vec<PollOutcome> {
    let total = rows.len();
    let (job_tx, job_rx) = mpsc::channel::<PlayerPoll>(total.max(1));
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<PollOutcome>(total.max(1));

    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count.max(1) {
        let state = state.clone();
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            loop {
                // Hold the receiver lock only for the recv itself.
                let job = { job_rx.lock().await.recv().await };
                let Some(row) = job else { break };
                if cancel.is_cancelled() {
                    break;
                }
                let outcome = poll_player(&state, region, row).await;
                if result_tx.send(outcome).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    for row in rows {
        if cancel.is_cancelled() {
            break;
        }
        if job_tx.send(row).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut outcomes = Vec::with_capacity(total);
    while let Some(outcome) = result_rx.recv().await {
        outcomes.push(outcome);
    }
    for worker in workers {
        let _ = worker.await;
    }
    outcomes
}

async fn poll_player(state: &AppState, region: Region, row: PlayerPoll) -> PollOutcome {
    let fetched = state.upstream.fetch_player(region, &row.player_id).await;
    match &fetched {
        Err(UpstreamError::NotFound) => {
            info!(%region, player_id = %row.player_id, "player gone upstream; dropping poll row");
        }
        Err(e) => {
            warn!(%region, player_id = %row.player_id, error = %e, "player poll failed");
        }
        Ok(_) => {}
    }
    outcome_for(row, fetched, Utc::now())
}

/// The per-player state machine. Pure so the whole table is testable:
///
/// | upstream outcome            | action   |
/// |-----------------------------|----------|
/// | 404                         | delete   |
/// | payload without lifetime ts | delete   |
/// | success                     | schedule |
/// | transport / decode error    | backoff  |
/// | no activity timestamps      | backoff  |
fn outcome_for(
    row: PlayerPoll,
    fetched: Result<PlayerRecord, UpstreamError>,
    now: DateTime<Utc>,
) -> PollOutcome {
    let record = match fetched {
        Ok(record) => record,
        Err(UpstreamError::NotFound) => {
            return PollOutcome::Delete {
                player_id: row.player_id,
            };
        }
        Err(_) => return failure(row, now),
    };

    let Some(payload_ts) = record.lifetime_statistics.timestamp else {
        return PollOutcome::Delete {
            player_id: row.player_id,
        };
    };

    let next_poll_at = match scheduler::next_poll_at(
        row.last_encountered,
        row.killboard_last_activity,
        row.other_last_activity,
        now,
    ) {
        Ok(next_poll_at) => next_poll_at,
        Err(e) => {
            warn!(player_id = %row.player_id, error = %e, "cannot schedule player");
            return failure(row, now);
        }
    };

    let stats = PlayerStatsRecord::from_poll(&row, &record, now);
    let poll = PlayerPoll {
        next_poll_at,
        last_poll_at: Some(now),
        error_count: 0,
        other_last_activity: Some(payload_ts),
        ..row
    };
    PollOutcome::Success {
        poll,
        stats: Box::new(stats),
    }
}

fn failure(row: PlayerPoll, now: DateTime<Utc>) -> PollOutcome {
    let error_count = row.error_count + 1;
    PollOutcome::Failure {
        poll: PlayerPoll {
            next_poll_at: now + scheduler::failure_backoff(error_count),
            error_count,
            ..row
        },
    }
}

struct Partitioned {
    deletes: Vec<String>,
    polls: Vec<PlayerPoll>,
    stats: Vec<PlayerStatsRecord>,
    failures: Vec<PlayerPoll>,
}

fn partition(outcomes: Vec<PollOutcome>) -> Partitioned {
    let mut parts = Partitioned {
        deletes: Vec::new(),
        polls: Vec::new(),
        stats: Vec::new(),
        failures: Vec::new(),
    };
    for outcome in outcomes {
        match outcome {
            PollOutcome::Delete { player_id } => parts.deletes.push(player_id),
            PollOutcome::Success { poll, stats } => {
                parts.polls.push(poll);
                parts.stats.push(*stats);
            }
            PollOutcome::Failure { poll } => parts.failures.push(poll),
        }
    }
    parts
}

/// Writes in a fixed order: deletes, successful poll updates, stats-latest
/// replacements, snapshot inserts, failure poll updates. A failed step
/// abandons the rest of the batch; the next tick re-selects and the
/// idempotent upserts make the retry safe.
async fn apply_outcomes(state: &AppState, region: Region, outcomes: Vec<PollOutcome>) {
    let parts = partition(outcomes);

    if let Err(e) = player_polls::delete(&state.db, region, &parts.deletes).await {
        error!(%region, error = %e, "delete of player poll rows failed");
        return;
    }
    if let Err(e) = player_polls::update_polled(&state.db, &parts.polls).await {
        error!(%region, error = %e, "update of successful poll rows failed");
        return;
    }
    if let Err(e) = player_stats::upsert_latest(&state.db, &parts.stats).await {
        error!(%region, error = %e, "stats-latest upsert failed");
        return;
    }
    if let Err(e) = player_stats::insert_snapshots(&state.db, &parts.stats).await {
        error!(%region, error = %e, "snapshot insert failed");
        return;
    }
    if let Err(e) = player_polls::update_failures(&state.db, &parts.failures).await {
        error!(%region, error = %e, "update of failed poll rows failed");
        return;
    }

    info!(
        %region,
        deletes = parts.deletes.len(),
        polls = parts.polls.len(),
        failures = parts.failures.len(),
        "player batch written"
    );
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use fameboard_shared::Region;

    use super::{outcome_for, partition, PollOutcome};
    use crate::db::player_polls::PlayerPoll;
    use crate::upstream::{PlayerRecord, UpstreamError};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("test timestamp should parse")
    }

    fn row(player_id: &str) -> PlayerPoll {
        PlayerPoll {
            region: Region::Americas,
            player_id: player_id.to_string(),
            next_poll_at: ts("2024-01-01T00:00:00Z"),
            last_poll_at: None,
            error_count: 0,
            last_encountered: None,
            killboard_last_activity: Some(ts("2024-01-01T00:00:00Z")),
            other_last_activity: None,
        }
    }

    fn player_record(lifetime_ts: Option<&str>) -> PlayerRecord {
        let mut payload = serde_json::json!({
            "Id": "V1",
            "Name": "Victim One",
            "KillFame": 1000,
            "DeathFame": 500,
            "FameRatio": 2.0,
            "LifetimeStatistics": {"PvE": {"Total": 1}}
        });
        if let Some(lifetime_ts) = lifetime_ts {
            payload["LifetimeStatistics"]["Timestamp"] = serde_json::json!(lifetime_ts);
        }
        serde_json::from_value(payload).expect("player record should parse")
    }

    #[test]
    fn discovery_then_success_schedules_six_hours_out() {
        // Discovered at 00:00, polled at 00:10; killboard activity is 10
        // minutes old so the 6h tier applies.
        let now = ts("2024-01-01T00:10:00Z");
        let outcome = outcome_for(
            row("V1"),
            Ok(player_record(Some("2024-01-01T00:00:00Z"))),
            now,
        );

        let PollOutcome::Success { poll, stats } = outcome else {
            panic!("expected success outcome");
        };
        assert_eq!(poll.next_poll_at, now + Duration::hours(6));
        assert_eq!(poll.error_count, 0);
        assert_eq!(poll.last_poll_at, Some(now));
        assert_eq!(
            poll.other_last_activity,
            Some(ts("2024-01-01T00:00:00Z")),
            "payload lifetime timestamp becomes other_last_activity"
        );
        assert_eq!(
            poll.killboard_last_activity,
            Some(ts("2024-01-01T00:00:00Z")),
            "killboard activity carries forward"
        );
        assert_eq!(stats.ts, now);
        assert_eq!(stats.kill_fame, 1000);
    }

    #[test]
    fn not_found_deletes_the_row() {
        let outcome = outcome_for(row("X"), Err(UpstreamError::NotFound), Utc::now());
        let PollOutcome::Delete { player_id } = outcome else {
            panic!("expected delete outcome");
        };
        assert_eq!(player_id, "X");
    }

    #[test]
    fn missing_lifetime_timestamp_deletes_the_row() {
        let outcome = outcome_for(row("X"), Ok(player_record(None)), Utc::now());
        assert!(matches!(outcome, PollOutcome::Delete { .. }));
    }

    #[test]
    fn transport_error_backs_off_exponentially() {
        let now = Utc::now();
        let mut failing = row("Y");
        failing.error_count = 2;

        let outcome = outcome_for(
            failing,
            Err(UpstreamError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }),
            now,
        );
        let PollOutcome::Failure { poll } = outcome else {
            panic!("expected failure outcome");
        };
        assert_eq!(poll.error_count, 3);
        assert_eq!(poll.next_poll_at, now + Duration::seconds(120));
    }

    #[test]
    fn missing_activity_timestamps_count_as_a_failure() {
        let now = Utc::now();
        let mut orphan = row("Z");
        orphan.killboard_last_activity = None;

        let outcome = outcome_for(
            orphan,
            Ok(player_record(Some("2024-01-01T00:00:00Z"))),
            now,
        );
        let PollOutcome::Failure { poll } = outcome else {
            panic!("expected failure outcome");
        };
        assert_eq!(poll.error_count, 1);
        assert_eq!(poll.next_poll_at, now + Duration::seconds(30));
    }

    #[tokio::test]
    async fn poll_lifecycle_persists_against_real_postgres() {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("Skipping real-Postgres integration test: DATABASE_URL is not set");
            return;
        };

        use sqlx::postgres::PgPoolOptions;

        use crate::db::{player_polls, player_stats};

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("connect real postgres");
        let mut lock_conn = pool.acquire().await.expect("acquire lock connection");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(81_020_100_i64)
            .execute(&mut *lock_conn)
            .await
            .expect("acquire poll test db lock");
        crate::db_migrations::run(&pool).await.expect("run migrations");
        sqlx::query(
            "TRUNCATE TABLE player_polls, player_stats_snapshots, player_stats_latest",
        )
        .execute(&pool)
        .await
        .expect("truncate player tables");

        let region = Region::Europe;
        let t0 = ts("2024-01-01T00:00:00Z");

        // Discovery: row lands due immediately with killboard activity set.
        let mut discovered = row("V1");
        discovered.region = region;
        discovered.next_poll_at = t0;
        discovered.killboard_last_activity = Some(t0);
        player_polls::upsert_discovered(&pool, &[discovered.clone()])
            .await
            .expect("discovery upsert");

        let due = player_polls::fetch_due(&pool, region, 10).await.expect("fetch due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].player_id, "V1");
        assert_eq!(due[0].next_poll_at, t0);
        assert_eq!(due[0].killboard_last_activity, Some(t0));

        // Successful poll at t0+10m: snapshot + latest + rescheduled row.
        let polled_at = ts("2024-01-01T00:10:00Z");
        let outcome = outcome_for(
            due.into_iter().next().expect("due row"),
            Ok(player_record(Some("2024-01-01T00:00:00Z"))),
            polled_at,
        );
        let PollOutcome::Success { poll, stats } = outcome else {
            panic!("expected success outcome");
        };
        let stats = *stats;
        player_polls::update_polled(&pool, std::slice::from_ref(&poll))
            .await
            .expect("update polled");
        player_stats::upsert_latest(&pool, std::slice::from_ref(&stats))
            .await
            .expect("upsert latest");
        player_stats::insert_snapshots(&pool, std::slice::from_ref(&stats))
            .await
            .expect("insert snapshot");

        let (next_poll_at, last_poll_at, error_count): (
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            i32,
        ) = sqlx::query_as(
            "SELECT next_poll_at, last_poll_at, error_count FROM player_polls \
             WHERE region = $1 AND player_id = $2",
        )
        .bind(region.as_str())
        .bind("V1")
        .fetch_one(&pool)
        .await
        .expect("poll row should exist");
        assert_eq!(next_poll_at, polled_at + Duration::hours(6));
        assert_eq!(last_poll_at, Some(polled_at));
        assert_eq!(error_count, 0);

        // Full-replacement latest row plus one append-only snapshot; a
        // second identical write leaves latest alone and adds nothing.
        player_stats::upsert_latest(&pool, std::slice::from_ref(&stats))
            .await
            .expect("second latest upsert");
        player_stats::insert_snapshots(&pool, std::slice::from_ref(&stats))
            .await
            .expect("second snapshot insert");
        let (latest_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM player_stats_latest")
                .fetch_one(&pool)
                .await
                .expect("latest count");
        let (snapshot_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM player_stats_snapshots")
                .fetch_one(&pool)
                .await
                .expect("snapshot count");
        assert_eq!(latest_count, 1);
        assert_eq!(snapshot_count, 1, "same ts conflicts away; append-only otherwise");

        // Rediscovery may only advance the schedule: last_poll_at + 12h is
        // later than the stored next_poll_at, so nothing moves.
        let mut rediscovered = discovered.clone();
        rediscovered.next_poll_at = ts("2024-01-01T00:20:00Z");
        rediscovered.killboard_last_activity = Some(ts("2024-01-01T00:20:00Z"));
        player_polls::upsert_discovered(&pool, &[rediscovered])
            .await
            .expect("rediscovery upsert");
        let (next_poll_at, killboard_last_activity): (DateTime<Utc>, Option<DateTime<Utc>>) =
            sqlx::query_as(
                "SELECT next_poll_at, killboard_last_activity FROM player_polls \
                 WHERE region = $1 AND player_id = $2",
            )
            .bind(region.as_str())
            .bind("V1")
            .fetch_one(&pool)
            .await
            .expect("poll row should exist");
        assert_eq!(
            next_poll_at,
            polled_at + Duration::hours(6),
            "LEAST(last_poll_at + 12h = 12:10, stored 06:10) keeps the stored schedule"
        );
        assert_eq!(killboard_last_activity, Some(ts("2024-01-01T00:20:00Z")));

        // Failure path: error_count and next_poll_at are the only fields
        // the failure upsert may touch.
        let mut failed = poll.clone();
        failed.error_count = 1;
        failed.next_poll_at = ts("2024-01-02T00:00:00Z");
        failed.last_poll_at = None;
        player_polls::update_failures(&pool, std::slice::from_ref(&failed))
            .await
            .expect("failure upsert");
        let (error_count, last_poll_at): (i32, Option<DateTime<Utc>>) = sqlx::query_as(
            "SELECT error_count, last_poll_at FROM player_polls \
             WHERE region = $1 AND player_id = $2",
        )
        .bind(region.as_str())
        .bind("V1")
        .fetch_one(&pool)
        .await
        .expect("poll row should exist");
        assert_eq!(error_count, 1);
        assert_eq!(
            last_poll_at,
            Some(polled_at),
            "failure upsert must not clear last_poll_at"
        );

        // 404 deletes the row.
        player_polls::delete(&pool, region, &["V1".to_string()])
            .await
            .expect("delete poll row");
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM player_polls")
            .fetch_one(&pool)
            .await
            .expect("poll count");
        assert_eq!(count, 0);

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(81_020_100_i64)
            .execute(&mut *lock_conn)
            .await
            .expect("release poll test db lock");
    }

    #[test]
    fn partition_splits_outcomes_into_write_groups() {
        let now = Utc::now();
        let outcomes = vec![
            outcome_for(row("A"), Err(UpstreamError::NotFound), now),
            outcome_for(row("B"), Ok(player_record(Some("2024-01-01T00:00:00Z"))), now),
            outcome_for(
                row("C"),
                Err(UpstreamError::Status {
                    status: 500,
                    body: String::new(),
                }),
                now,
            ),
        ];

        let parts = partition(outcomes);
        assert_eq!(parts.deletes, ["A"]);
        assert_eq!(parts.polls.len(), 1);
        assert_eq!(parts.stats.len(), 1);
        assert_eq!(parts.polls[0].player_id, "B");
        assert_eq!(parts.failures.len(), 1);
        assert_eq!(parts.failures[0].player_id, "C");
    }
}
