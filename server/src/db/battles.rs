use chrono::{DateTime, Utc};
use fameboard_shared::battles::{
    BattleAllianceEntry, BattleDetail, BattleGuildEntry, BattleKillEntry, BattleListEntry,
    BattlePlayerEntry,
};
use fameboard_shared::boards::{TopAlliance, TopGuild, TopPlayer};
use fameboard_shared::Region;
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Battle summary as written by the battleboard poller. Name lists are
/// ordered by kill count; alliance and guild entries carry participant
/// counts in parentheses.
#[derive(Debug, Clone)]
pub struct BattleSummaryRow {
    pub region: Region,
    pub battle_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_players: i32,
    pub total_kills: i32,
    pub total_fame: i64,
    pub alliance_names: Vec<String>,
    pub guild_names: Vec<String>,
    pub player_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BattleAllianceStatsRow {
    pub region: Region,
    pub battle_id: i64,
    pub alliance_name: String,
    pub player_count: i32,
    pub kills: i32,
    pub deaths: i32,
    pub kill_fame: i64,
}

#[derive(Debug, Clone)]
pub struct BattleGuildStatsRow {
    pub region: Region,
    pub battle_id: i64,
    pub guild_name: String,
    pub alliance_name: Option<String>,
    pub player_count: i32,
    pub kills: i32,
    pub deaths: i32,
    pub kill_fame: i64,
}

#[derive(Debug, Clone)]
pub struct BattlePlayerStatsRow {
    pub region: Region,
    pub battle_id: i64,
    pub player_name: String,
    pub guild_name: Option<String>,
    pub alliance_name: Option<String>,
    pub kills: i32,
    pub deaths: i32,
    pub kill_fame: i64,
}

#[derive(Debug, Clone)]
pub struct BattleQueueRow {
    pub region: Region,
    pub battle_id: i64,
    pub ts: DateTime<Utc>,
}

/// Event-derived values the enricher writes back onto roll-up rows.
#[derive(Debug, Clone, PartialEq)]
pub struct AllianceEnrichment {
    pub alliance_name: String,
    pub death_fame: i64,
    pub ip: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuildEnrichment {
    pub guild_name: String,
    pub death_fame: i64,
    pub ip: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEnrichment {
    pub player_name: String,
    pub death_fame: i64,
    pub ip: i32,
    pub weapon: Option<String>,
    pub damage: i64,
    pub healing: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BattleKillRow {
    pub battle_id: i64,
    pub ts: DateTime<Utc>,
    pub killer_name: String,
    pub killer_ip: i32,
    pub killer_weapon: Option<String>,
    pub victim_name: String,
    pub victim_ip: i32,
    pub victim_weapon: Option<String>,
    pub fame: i64,
}

pub async fn insert_summaries(
    pool: &PgPool,
    rows: &[BattleSummaryRow],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO battle_summary \
         (region, battle_id, start_time, end_time, total_players, total_kills, \
          total_fame, alliance_names, guild_names, player_names) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.region.as_str())
            .push_bind(row.battle_id)
            .push_bind(row.start_time)
            .push_bind(row.end_time)
            .push_bind(row.total_players)
            .push_bind(row.total_kills)
            .push_bind(row.total_fame)
            .push_bind(&row.alliance_names)
            .push_bind(&row.guild_names)
            .push_bind(&row.player_names);
    });
    builder.push(" ON CONFLICT (region, battle_id) DO NOTHING");
    builder.build().execute(pool).await?;
    Ok(())
}

pub async fn insert_alliance_stats(
    pool: &PgPool,
    rows: &[BattleAllianceStatsRow],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO battle_alliance_stats \
         (region, battle_id, alliance_name, player_count, kills, deaths, kill_fame) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.region.as_str())
            .push_bind(row.battle_id)
            .push_bind(&row.alliance_name)
            .push_bind(row.player_count)
            .push_bind(row.kills)
            .push_bind(row.deaths)
            .push_bind(row.kill_fame);
    });
    builder.push(" ON CONFLICT (region, battle_id, alliance_name) DO NOTHING");
    builder.build().execute(pool).await?;
    Ok(())
}

pub async fn insert_guild_stats(
    pool: &PgPool,
    rows: &[BattleGuildStatsRow],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO battle_guild_stats \
         (region, battle_id, guild_name, alliance_name, player_count, kills, deaths, kill_fame) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.region.as_str())
            .push_bind(row.battle_id)
            .push_bind(&row.guild_name)
            .push_bind(&row.alliance_name)
            .push_bind(row.player_count)
            .push_bind(row.kills)
            .push_bind(row.deaths)
            .push_bind(row.kill_fame);
    });
    builder.push(" ON CONFLICT (region, battle_id, guild_name) DO NOTHING");
    builder.build().execute(pool).await?;
    Ok(())
}

pub async fn insert_player_stats(
    pool: &PgPool,
    rows: &[BattlePlayerStatsRow],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO battle_player_stats \
         (region, battle_id, player_name, guild_name, alliance_name, kills, deaths, kill_fame) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.region.as_str())
            .push_bind(row.battle_id)
            .push_bind(&row.player_name)
            .push_bind(&row.guild_name)
            .push_bind(&row.alliance_name)
            .push_bind(row.kills)
            .push_bind(row.deaths)
            .push_bind(row.kill_fame);
    });
    builder.push(" ON CONFLICT (region, battle_id, player_name) DO NOTHING");
    builder.build().execute(pool).await?;
    Ok(())
}

pub async fn insert_queue(pool: &PgPool, rows: &[BattleQueueRow]) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO battle_queue (region, battle_id, ts, error_count) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.region.as_str())
            .push_bind(row.battle_id)
            .push_bind(row.ts)
            .push_bind(0i32);
    });
    builder.push(" ON CONFLICT (region, battle_id) DO NOTHING");
    builder.build().execute(pool).await?;
    Ok(())
}

/// Oldest queued battle for the region, if any.
pub async fn next_queued(
    pool: &PgPool,
    region: Region,
) -> Result<Option<(i64, DateTime<Utc>)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT battle_id, ts FROM battle_queue \
         WHERE region = $1 ORDER BY ts ASC LIMIT 1",
    )
    .bind(region.as_str())
    .fetch_optional(pool)
    .await
}

/// Applies event-derived enrichment and removes the queue row in a single
/// transaction, so the row disappears only together with its stats updates
/// and kill inserts.
pub async fn apply_enrichment(
    pool: &PgPool,
    region: Region,
    battle_id: i64,
    alliances: &[AllianceEnrichment],
    guilds: &[GuildEnrichment],
    players: &[PlayerEnrichment],
    kills: &[BattleKillRow],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for row in alliances {
        sqlx::query(
            "UPDATE battle_alliance_stats SET death_fame = $4, ip = $5 \
             WHERE region = $1 AND battle_id = $2 AND alliance_name = $3",
        )
        .bind(region.as_str())
        .bind(battle_id)
        .bind(&row.alliance_name)
        .bind(row.death_fame)
        .bind(row.ip)
        .execute(&mut *tx)
        .await?;
    }

    for row in guilds {
        sqlx::query(
            "UPDATE battle_guild_stats SET death_fame = $4, ip = $5 \
             WHERE region = $1 AND battle_id = $2 AND guild_name = $3",
        )
        .bind(region.as_str())
        .bind(battle_id)
        .bind(&row.guild_name)
        .bind(row.death_fame)
        .bind(row.ip)
        .execute(&mut *tx)
        .await?;
    }

    for row in players {
        sqlx::query(
            "UPDATE battle_player_stats \
             SET death_fame = $4, ip = $5, weapon = $6, damage = $7, healing = $8 \
             WHERE region = $1 AND battle_id = $2 AND player_name = $3",
        )
        .bind(region.as_str())
        .bind(battle_id)
        .bind(&row.player_name)
        .bind(row.death_fame)
        .bind(row.ip)
        .bind(&row.weapon)
        .bind(row.damage)
        .bind(row.healing)
        .execute(&mut *tx)
        .await?;
    }

    if !kills.is_empty() {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO battle_kills \
             (region, battle_id, ts, killer_name, killer_ip, killer_weapon, \
              victim_name, victim_ip, victim_weapon, fame) ",
        );
        builder.push_values(kills, |mut b, row| {
            b.push_bind(region.as_str())
                .push_bind(row.battle_id)
                .push_bind(row.ts)
                .push_bind(&row.killer_name)
                .push_bind(row.killer_ip)
                .push_bind(&row.killer_weapon)
                .push_bind(&row.victim_name)
                .push_bind(row.victim_ip)
                .push_bind(&row.victim_weapon)
                .push_bind(row.fame);
        });
        builder.push(
            " ON CONFLICT (region, battle_id, ts, killer_name, victim_name) DO NOTHING",
        );
        builder.build().execute(&mut *tx).await?;
    }

    sqlx::query("DELETE FROM battle_queue WHERE region = $1 AND battle_id = $2")
        .bind(region.as_str())
        .bind(battle_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// Bumps the queue row's error counter after a failed enrichment attempt;
/// the row itself stays for retry.
pub async fn mark_enrichment_failed(
    pool: &PgPool,
    region: Region,
    battle_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE battle_queue SET error_count = error_count + 1 \
         WHERE region = $1 AND battle_id = $2",
    )
    .bind(region.as_str())
    .bind(battle_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// One-year retention over every battle table, in a single transaction.
/// Roll-up rows go first (they are keyed off the summary's start_time),
/// summaries last.
pub async fn purge_old(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for table in [
        "battle_alliance_stats",
        "battle_guild_stats",
        "battle_player_stats",
    ] {
        sqlx::query(&format!(
            "DELETE FROM {table} s USING battle_summary b \
             WHERE s.region = b.region AND s.battle_id = b.battle_id \
             AND b.start_time < now() - INTERVAL '1 year'"
        ))
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("DELETE FROM battle_kills WHERE ts < now() - INTERVAL '1 year'")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM battle_queue WHERE ts < now() - INTERVAL '1 year'")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM battle_summary WHERE start_time < now() - INTERVAL '1 year'")
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

type SummaryRow = (
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
    i32,
    i32,
    i64,
    Vec<String>,
    Vec<String>,
    Vec<String>,
);

fn summary_entry(row: SummaryRow) -> BattleListEntry {
    let (
        battle_id,
        start_time,
        end_time,
        total_players,
        total_kills,
        total_fame,
        alliance_names,
        guild_names,
        player_names,
    ) = row;
    BattleListEntry {
        battle_id,
        start_time: start_time.to_rfc3339(),
        end_time: end_time.to_rfc3339(),
        total_players,
        total_kills,
        total_fame,
        alliance_names,
        guild_names,
        player_names,
    }
}

pub async fn summaries_by_region(
    pool: &PgPool,
    region: Region,
    limit: i64,
    offset: i64,
    min_players: i32,
) -> Result<Vec<BattleListEntry>, sqlx::Error> {
    let rows: Vec<SummaryRow> = sqlx::query_as(
        "SELECT battle_id, start_time, end_time, total_players, total_kills, \
         total_fame, alliance_names, guild_names, player_names \
         FROM battle_summary \
         WHERE region = $1 AND total_players >= $2 \
         ORDER BY start_time DESC \
         LIMIT $3 OFFSET $4",
    )
    .bind(region.as_str())
    .bind(min_players)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(summary_entry).collect())
}

pub async fn battle_detail(
    pool: &PgPool,
    region: Region,
    battle_id: i64,
) -> Result<Option<BattleDetail>, sqlx::Error> {
    let summary: Option<SummaryRow> = sqlx::query_as(
        "SELECT battle_id, start_time, end_time, total_players, total_kills, \
         total_fame, alliance_names, guild_names, player_names \
         FROM battle_summary WHERE region = $1 AND battle_id = $2",
    )
    .bind(region.as_str())
    .bind(battle_id)
    .fetch_optional(pool)
    .await?;

    let Some(summary) = summary else {
        return Ok(None);
    };

    let alliances: Vec<(String, i32, i32, i32, i64, Option<i64>, Option<i32>)> = sqlx::query_as(
        "SELECT alliance_name, player_count, kills, deaths, kill_fame, death_fame, ip \
         FROM battle_alliance_stats \
         WHERE region = $1 AND battle_id = $2 \
         ORDER BY kills DESC, alliance_name ASC",
    )
    .bind(region.as_str())
    .bind(battle_id)
    .fetch_all(pool)
    .await?;

    let guilds: Vec<(String, Option<String>, i32, i32, i32, i64, Option<i64>, Option<i32>)> =
        sqlx::query_as(
            "SELECT guild_name, alliance_name, player_count, kills, deaths, kill_fame, \
             death_fame, ip \
             FROM battle_guild_stats \
             WHERE region = $1 AND battle_id = $2 \
             ORDER BY kills DESC, guild_name ASC",
        )
        .bind(region.as_str())
        .bind(battle_id)
        .fetch_all(pool)
        .await?;

    let players: Vec<(
        String,
        Option<String>,
        Option<String>,
        i32,
        i32,
        i64,
        Option<i64>,
        Option<i32>,
        Option<String>,
        Option<i64>,
        Option<i64>,
    )> = sqlx::query_as(
        "SELECT player_name, guild_name, alliance_name, kills, deaths, kill_fame, \
         death_fame, ip, weapon, damage, healing \
         FROM battle_player_stats \
         WHERE region = $1 AND battle_id = $2 \
         ORDER BY kills DESC, player_name ASC",
    )
    .bind(region.as_str())
    .bind(battle_id)
    .fetch_all(pool)
    .await?;

    let kills: Vec<(
        DateTime<Utc>,
        String,
        i32,
        Option<String>,
        String,
        i32,
        Option<String>,
        i64,
    )> = sqlx::query_as(
        "SELECT ts, killer_name, killer_ip, killer_weapon, victim_name, victim_ip, \
         victim_weapon, fame \
         FROM battle_kills \
         WHERE region = $1 AND battle_id = $2 \
         ORDER BY ts ASC",
    )
    .bind(region.as_str())
    .bind(battle_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(BattleDetail {
        summary: summary_entry(summary),
        alliances: alliances
            .into_iter()
            .map(
                |(alliance_name, player_count, kills, deaths, kill_fame, death_fame, ip)| {
                    BattleAllianceEntry {
                        alliance_name,
                        player_count,
                        kills,
                        deaths,
                        kill_fame,
                        death_fame,
                        ip,
                    }
                },
            )
            .collect(),
        guilds: guilds
            .into_iter()
            .map(
                |(
                    guild_name,
                    alliance_name,
                    player_count,
                    kills,
                    deaths,
                    kill_fame,
                    death_fame,
                    ip,
                )| BattleGuildEntry {
                    guild_name,
                    alliance_name,
                    player_count,
                    kills,
                    deaths,
                    kill_fame,
                    death_fame,
                    ip,
                },
            )
            .collect(),
        players: players
            .into_iter()
            .map(
                |(
                    player_name,
                    guild_name,
                    alliance_name,
                    kills,
                    deaths,
                    kill_fame,
                    death_fame,
                    ip,
                    weapon,
                    damage,
                    healing,
                )| BattlePlayerEntry {
                    player_name,
                    guild_name,
                    alliance_name,
                    kills,
                    deaths,
                    kill_fame,
                    death_fame,
                    ip,
                    weapon,
                    damage,
                    healing,
                },
            )
            .collect(),
        kills: kills
            .into_iter()
            .map(
                |(ts, killer_name, killer_ip, killer_weapon, victim_name, victim_ip, victim_weapon, fame)| {
                    BattleKillEntry {
                        ts: ts.to_rfc3339(),
                        killer_name,
                        killer_ip,
                        killer_weapon,
                        victim_name,
                        victim_ip,
                        victim_weapon,
                        fame,
                    }
                },
            )
            .collect(),
    }))
}

type TopRow = (String, i64, i64, i64, i64);

/// Top alliances by summed kill fame over battles of the last 30 days.
pub async fn top_alliances(
    pool: &PgPool,
    region: Region,
    limit: i64,
) -> Result<Vec<TopAlliance>, sqlx::Error> {
    let rows: Vec<TopRow> = sqlx::query_as(
        "SELECT s.alliance_name, COUNT(*)::BIGINT, SUM(s.kills)::BIGINT, \
         SUM(s.deaths)::BIGINT, SUM(s.kill_fame)::BIGINT \
         FROM battle_alliance_stats s \
         JOIN battle_summary b ON b.region = s.region AND b.battle_id = s.battle_id \
         WHERE s.region = $1 AND b.start_time >= now() - INTERVAL '30 days' \
         GROUP BY s.alliance_name \
         ORDER BY SUM(s.kill_fame) DESC \
         LIMIT $2",
    )
    .bind(region.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(alliance_name, battles, kills, deaths, kill_fame)| TopAlliance {
            alliance_name,
            battles,
            kills,
            deaths,
            kill_fame,
        })
        .collect())
}

pub async fn top_guilds(
    pool: &PgPool,
    region: Region,
    limit: i64,
) -> Result<Vec<TopGuild>, sqlx::Error> {
    let rows: Vec<TopRow> = sqlx::query_as(
        "SELECT s.guild_name, COUNT(*)::BIGINT, SUM(s.kills)::BIGINT, \
         SUM(s.deaths)::BIGINT, SUM(s.kill_fame)::BIGINT \
         FROM battle_guild_stats s \
         JOIN battle_summary b ON b.region = s.region AND b.battle_id = s.battle_id \
         WHERE s.region = $1 AND b.start_time >= now() - INTERVAL '30 days' \
         GROUP BY s.guild_name \
         ORDER BY SUM(s.kill_fame) DESC \
         LIMIT $2",
    )
    .bind(region.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(guild_name, battles, kills, deaths, kill_fame)| TopGuild {
            guild_name,
            battles,
            kills,
            deaths,
            kill_fame,
        })
        .collect())
}

pub async fn top_players(
    pool: &PgPool,
    region: Region,
    limit: i64,
) -> Result<Vec<TopPlayer>, sqlx::Error> {
    let rows: Vec<TopRow> = sqlx::query_as(
        "SELECT s.player_name, COUNT(*)::BIGINT, SUM(s.kills)::BIGINT, \
         SUM(s.deaths)::BIGINT, SUM(s.kill_fame)::BIGINT \
         FROM battle_player_stats s \
         JOIN battle_summary b ON b.region = s.region AND b.battle_id = s.battle_id \
         WHERE s.region = $1 AND b.start_time >= now() - INTERVAL '30 days' \
         GROUP BY s.player_name \
         ORDER BY SUM(s.kill_fame) DESC \
         LIMIT $2",
    )
    .bind(region.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(player_name, battles, kills, deaths, kill_fame)| TopPlayer {
            player_name,
            battles,
            kills,
            deaths,
            kill_fame,
        })
        .collect())
}
