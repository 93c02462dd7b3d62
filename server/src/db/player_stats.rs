use chrono::{DateTime, Utc};
use fameboard_shared::players::{GatheringSeries, PlayerSearchHit, PlayerSummary, PveSeries, PvpSeries};
use fameboard_shared::Region;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::db::player_polls::PlayerPoll;
use crate::upstream::PlayerRecord;

/// Column list shared by the snapshot insert and the stats-latest upsert.
/// The first two entries are the conflict key of `player_stats_latest`.
pub const STATS_COLUMNS: &[&str] = &[
    "region",
    "player_id",
    "ts",
    "last_encountered",
    "killboard_last_activity",
    "other_last_activity",
    "name",
    "guild_id",
    "guild_name",
    "alliance_id",
    "alliance_name",
    "alliance_tag",
    "kill_fame",
    "death_fame",
    "fame_ratio",
    "pve_total",
    "pve_royal",
    "pve_outlands",
    "pve_avalon",
    "pve_hellgate",
    "pve_corrupted",
    "pve_mists",
    "gather_fiber_total",
    "gather_fiber_royal",
    "gather_fiber_outlands",
    "gather_fiber_avalon",
    "gather_hide_total",
    "gather_hide_royal",
    "gather_hide_outlands",
    "gather_hide_avalon",
    "gather_ore_total",
    "gather_ore_royal",
    "gather_ore_outlands",
    "gather_ore_avalon",
    "gather_rock_total",
    "gather_rock_royal",
    "gather_rock_outlands",
    "gather_rock_avalon",
    "gather_wood_total",
    "gather_wood_royal",
    "gather_wood_outlands",
    "gather_wood_avalon",
    "gather_all_total",
    "gather_all_royal",
    "gather_all_outlands",
    "gather_all_avalon",
    "crafting_total",
    "crafting_royal",
    "crafting_outlands",
    "crafting_avalon",
    "fishing_fame",
    "farming_fame",
    "crystal_league_fame",
];

/// One timestamped copy of everything the upstream returns for a player.
/// Written append-only into snapshots and as a full replacement into
/// `player_stats_latest`.
#[derive(Debug, Clone)]
pub struct PlayerStatsRecord {
    pub region: Region,
    pub player_id: String,
    pub ts: DateTime<Utc>,
    pub last_encountered: Option<DateTime<Utc>>,
    pub killboard_last_activity: Option<DateTime<Utc>>,
    pub other_last_activity: Option<DateTime<Utc>>,
    pub name: String,
    pub guild_id: Option<String>,
    pub guild_name: Option<String>,
    pub alliance_id: Option<String>,
    pub alliance_name: Option<String>,
    pub alliance_tag: Option<String>,
    pub kill_fame: i64,
    pub death_fame: i64,
    pub fame_ratio: Option<f64>,
    pub pve_total: i64,
    pub pve_royal: i64,
    pub pve_outlands: i64,
    pub pve_avalon: i64,
    pub pve_hellgate: i64,
    pub pve_corrupted: i64,
    pub pve_mists: i64,
    pub gather_fiber_total: i64,
    pub gather_fiber_royal: i64,
    pub gather_fiber_outlands: i64,
    pub gather_fiber_avalon: i64,
    pub gather_hide_total: i64,
    pub gather_hide_royal: i64,
    pub gather_hide_outlands: i64,
    pub gather_hide_avalon: i64,
    pub gather_ore_total: i64,
    pub gather_ore_royal: i64,
    pub gather_ore_outlands: i64,
    pub gather_ore_avalon: i64,
    pub gather_rock_total: i64,
    pub gather_rock_royal: i64,
    pub gather_rock_outlands: i64,
    pub gather_rock_avalon: i64,
    pub gather_wood_total: i64,
    pub gather_wood_royal: i64,
    pub gather_wood_outlands: i64,
    pub gather_wood_avalon: i64,
    pub gather_all_total: i64,
    pub gather_all_royal: i64,
    pub gather_all_outlands: i64,
    pub gather_all_avalon: i64,
    pub crafting_total: i64,
    pub crafting_royal: i64,
    pub crafting_outlands: i64,
    pub crafting_avalon: i64,
    pub fishing_fame: i64,
    pub farming_fame: i64,
    pub crystal_league_fame: i64,
}

impl PlayerStatsRecord {
    /// Maps an upstream payload onto a stats row, carrying the poll row's
    /// `last_encountered`/`killboard_last_activity` forward and taking
    /// `other_last_activity` from the payload's lifetime timestamp.
    pub fn from_poll(poll: &PlayerPoll, record: &PlayerRecord, ts: DateTime<Utc>) -> Self {
        let lifetime = &record.lifetime_statistics;
        let gathering = &lifetime.gathering;
        Self {
            region: poll.region,
            player_id: poll.player_id.clone(),
            ts,
            last_encountered: poll.last_encountered,
            killboard_last_activity: poll.killboard_last_activity,
            other_last_activity: lifetime.timestamp,
            name: record.name.clone(),
            guild_id: optional(&record.guild_id),
            guild_name: optional(&record.guild_name),
            alliance_id: optional(&record.alliance_id),
            alliance_name: optional(&record.alliance_name),
            alliance_tag: optional(&record.alliance_tag),
            kill_fame: record.kill_fame,
            death_fame: record.death_fame,
            fame_ratio: Some(record.fame_ratio).filter(|value| value.is_finite()),
            pve_total: lifetime.pve.total,
            pve_royal: lifetime.pve.royal,
            pve_outlands: lifetime.pve.outlands,
            pve_avalon: lifetime.pve.avalon,
            pve_hellgate: lifetime.pve.hellgate,
            pve_corrupted: lifetime.pve.corrupted_dungeon,
            pve_mists: lifetime.pve.mists,
            gather_fiber_total: gathering.fiber.total,
            gather_fiber_royal: gathering.fiber.royal,
            gather_fiber_outlands: gathering.fiber.outlands,
            gather_fiber_avalon: gathering.fiber.avalon,
            gather_hide_total: gathering.hide.total,
            gather_hide_royal: gathering.hide.royal,
            gather_hide_outlands: gathering.hide.outlands,
            gather_hide_avalon: gathering.hide.avalon,
            gather_ore_total: gathering.ore.total,
            gather_ore_royal: gathering.ore.royal,
            gather_ore_outlands: gathering.ore.outlands,
            gather_ore_avalon: gathering.ore.avalon,
            gather_rock_total: gathering.rock.total,
            gather_rock_royal: gathering.rock.royal,
            gather_rock_outlands: gathering.rock.outlands,
            gather_rock_avalon: gathering.rock.avalon,
            gather_wood_total: gathering.wood.total,
            gather_wood_royal: gathering.wood.royal,
            gather_wood_outlands: gathering.wood.outlands,
            gather_wood_avalon: gathering.wood.avalon,
            gather_all_total: gathering.all.total,
            gather_all_royal: gathering.all.royal,
            gather_all_outlands: gathering.all.outlands,
            gather_all_avalon: gathering.all.avalon,
            crafting_total: lifetime.crafting.total,
            crafting_royal: lifetime.crafting.royal,
            crafting_outlands: lifetime.crafting.outlands,
            crafting_avalon: lifetime.crafting.avalon,
            fishing_fame: record.fishing_fame,
            farming_fame: record.farming_fame,
            crystal_league_fame: record.crystal_league,
        }
    }
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Append-only snapshot insert; duplicate (region, player_id, ts) rows are
/// silently dropped.
pub async fn insert_snapshots(
    pool: &PgPool,
    rows: &[PlayerStatsRecord],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "INSERT INTO player_stats_snapshots ({}) ",
        STATS_COLUMNS.join(", ")
    ));
    push_stats_values(&mut builder, rows);
    builder.push(" ON CONFLICT DO NOTHING");
    builder.build().execute(pool).await?;
    Ok(())
}

/// Full-row replacement of the latest stats per player.
pub async fn upsert_latest(pool: &PgPool, rows: &[PlayerStatsRecord]) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(format!(
        "INSERT INTO player_stats_latest ({}) ",
        STATS_COLUMNS.join(", ")
    ));
    push_stats_values(&mut builder, rows);
    builder.push(format!(
        " ON CONFLICT (region, player_id) DO UPDATE SET {}",
        replacement_set_clause()
    ));
    builder.build().execute(pool).await?;
    Ok(())
}

fn replacement_set_clause() -> String {
    STATS_COLUMNS
        .iter()
        .skip(2)
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_stats_values<'args>(
    builder: &mut QueryBuilder<'args, Postgres>,
    rows: &'args [PlayerStatsRecord],
) {
    builder.push_values(rows, |mut b, r| {
        b.push_bind(r.region.as_str())
            .push_bind(&r.player_id)
            .push_bind(r.ts)
            .push_bind(r.last_encountered)
            .push_bind(r.killboard_last_activity)
            .push_bind(r.other_last_activity)
            .push_bind(&r.name)
            .push_bind(&r.guild_id)
            .push_bind(&r.guild_name)
            .push_bind(&r.alliance_id)
            .push_bind(&r.alliance_name)
            .push_bind(&r.alliance_tag)
            .push_bind(r.kill_fame)
            .push_bind(r.death_fame)
            .push_bind(r.fame_ratio)
            .push_bind(r.pve_total)
            .push_bind(r.pve_royal)
            .push_bind(r.pve_outlands)
            .push_bind(r.pve_avalon)
            .push_bind(r.pve_hellgate)
            .push_bind(r.pve_corrupted)
            .push_bind(r.pve_mists)
            .push_bind(r.gather_fiber_total)
            .push_bind(r.gather_fiber_royal)
            .push_bind(r.gather_fiber_outlands)
            .push_bind(r.gather_fiber_avalon)
            .push_bind(r.gather_hide_total)
            .push_bind(r.gather_hide_royal)
            .push_bind(r.gather_hide_outlands)
            .push_bind(r.gather_hide_avalon)
            .push_bind(r.gather_ore_total)
            .push_bind(r.gather_ore_royal)
            .push_bind(r.gather_ore_outlands)
            .push_bind(r.gather_ore_avalon)
            .push_bind(r.gather_rock_total)
            .push_bind(r.gather_rock_royal)
            .push_bind(r.gather_rock_outlands)
            .push_bind(r.gather_rock_avalon)
            .push_bind(r.gather_wood_total)
            .push_bind(r.gather_wood_royal)
            .push_bind(r.gather_wood_outlands)
            .push_bind(r.gather_wood_avalon)
            .push_bind(r.gather_all_total)
            .push_bind(r.gather_all_royal)
            .push_bind(r.gather_all_outlands)
            .push_bind(r.gather_all_avalon)
            .push_bind(r.crafting_total)
            .push_bind(r.crafting_royal)
            .push_bind(r.crafting_outlands)
            .push_bind(r.crafting_avalon)
            .push_bind(r.fishing_fame)
            .push_bind(r.farming_fame)
            .push_bind(r.crystal_league_fame);
    });
}

pub async fn latest_summary(
    pool: &PgPool,
    region: Region,
    player_id: &str,
) -> Result<Option<PlayerSummary>, sqlx::Error> {
    let row: Option<(
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        i64,
        i64,
        Option<f64>,
        DateTime<Utc>,
    )> = sqlx::query_as(
        "SELECT player_id, name, guild_name, alliance_name, alliance_tag, \
         kill_fame, death_fame, fame_ratio, ts \
         FROM player_stats_latest WHERE region = $1 AND player_id = $2",
    )
    .bind(region.as_str())
    .bind(player_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(
        |(player_id, name, guild_name, alliance_name, alliance_tag, kill_fame, death_fame, fame_ratio, ts)| {
            PlayerSummary {
                player_id,
                name,
                guild_name,
                alliance_name,
                alliance_tag,
                kill_fame,
                death_fame,
                fame_ratio,
                polled_at: ts.timestamp_millis(),
            }
        },
    ))
}

pub async fn search(
    pool: &PgPool,
    region: Region,
    prefix: &str,
    limit: i64,
) -> Result<Vec<PlayerSearchHit>, sqlx::Error> {
    let pattern = format!("{prefix}%");
    let rows: Vec<(String, String, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT player_id, name, guild_name, alliance_name \
         FROM player_stats_latest \
         WHERE region = $1 AND LOWER(name) LIKE LOWER($2) \
         ORDER BY name ASC \
         LIMIT $3",
    )
    .bind(region.as_str())
    .bind(&pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(player_id, name, guild_name, alliance_name)| PlayerSearchHit {
            player_id,
            name,
            guild_name,
            alliance_name,
        })
        .collect())
}

pub async fn pvp_series(
    pool: &PgPool,
    region: Region,
    player_id: &str,
) -> Result<PvpSeries, sqlx::Error> {
    let rows: Vec<(DateTime<Utc>, i64, i64, Option<f64>)> = sqlx::query_as(
        "SELECT ts, kill_fame, death_fame, fame_ratio \
         FROM player_stats_snapshots \
         WHERE region = $1 AND player_id = $2 \
         ORDER BY ts",
    )
    .bind(region.as_str())
    .bind(player_id)
    .fetch_all(pool)
    .await?;

    let mut series = PvpSeries::default();
    for (ts, kill_fame, death_fame, fame_ratio) in rows {
        series.timestamps.push(ts.timestamp_millis());
        series.kill_fame.push(kill_fame);
        series.death_fame.push(death_fame);
        series.fame_ratio.push(fame_ratio);
    }
    Ok(series)
}

pub async fn pve_series(
    pool: &PgPool,
    region: Region,
    player_id: &str,
) -> Result<PveSeries, sqlx::Error> {
    let rows: Vec<(DateTime<Utc>, i64, i64, i64, i64, i64, i64, i64)> = sqlx::query_as(
        "SELECT ts, pve_total, pve_royal, pve_outlands, pve_avalon, \
         pve_hellgate, pve_corrupted, pve_mists \
         FROM player_stats_snapshots \
         WHERE region = $1 AND player_id = $2 \
         ORDER BY ts",
    )
    .bind(region.as_str())
    .bind(player_id)
    .fetch_all(pool)
    .await?;

    let mut series = PveSeries::default();
    for (ts, total, royal, outlands, avalon, hellgate, corrupted, mists) in rows {
        series.timestamps.push(ts.timestamp_millis());
        series.total.push(total);
        series.royal.push(royal);
        series.outlands.push(outlands);
        series.avalon.push(avalon);
        series.hellgate.push(hellgate);
        series.corrupted.push(corrupted);
        series.mists.push(mists);
    }
    Ok(series)
}

pub async fn gathering_series(
    pool: &PgPool,
    region: Region,
    player_id: &str,
) -> Result<GatheringSeries, sqlx::Error> {
    let rows: Vec<(DateTime<Utc>, i64, i64, i64, i64)> = sqlx::query_as(
        "SELECT ts, gather_all_total, gather_all_royal, gather_all_outlands, gather_all_avalon \
         FROM player_stats_snapshots \
         WHERE region = $1 AND player_id = $2 \
         ORDER BY ts",
    )
    .bind(region.as_str())
    .bind(player_id)
    .fetch_all(pool)
    .await?;

    let mut series = GatheringSeries::default();
    for (ts, total, royal, outlands, avalon) in rows {
        series.timestamps.push(ts.timestamp_millis());
        series.total.push(total);
        series.royal.push(royal);
        series.outlands.push(outlands);
        series.avalon.push(avalon);
    }
    Ok(series)
}
