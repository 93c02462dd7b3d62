use std::collections::HashSet;
use std::time::Duration;

use fameboard_shared::Region;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{self, BATTLES_FETCH_ATTEMPTS};
use crate::db::battles::{
    self, BattleAllianceStatsRow, BattleGuildStatsRow, BattlePlayerStatsRow, BattleQueueRow,
    BattleSummaryRow,
};
use crate::state::AppState;
use crate::upstream::{Battle, UpstreamError};

/// Pulls the battleboard feed every tick, writes summaries and roll-up rows
/// and enqueues each battle for event-level enrichment.
pub async fn run(state: AppState, region: Region, cancel: CancellationToken) {
    let poll_interval = config::battles_interval();
    let page_size = config::battles_page_size();
    let max_pages = config::battles_max_pages();
    info!(
        %region,
        interval_secs = poll_interval.as_secs(),
        page_size,
        max_pages,
        "battleboard polling started"
    );

    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!(%region, "battleboard poller stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        run_once(&state, region, page_size, max_pages).await;
    }
}

async fn run_once(state: &AppState, region: Region, page_size: i64, max_pages: u32) {
    let battles = match fetch_battles(state, region, page_size, max_pages).await {
        Ok(battles) => battles,
        Err(e) => {
            // Retries exhausted; the whole batch is dropped until next tick.
            error!(%region, error = %e, "failed to fetch battleboard");
            return;
        }
    };
    if battles.is_empty() {
        return;
    }

    let summaries: Vec<BattleSummaryRow> =
        battles.iter().map(|b| summary_row(region, b)).collect();
    let alliance_stats: Vec<BattleAllianceStatsRow> =
        battles.iter().flat_map(|b| alliance_stats_rows(region, b)).collect();
    let guild_stats: Vec<BattleGuildStatsRow> =
        battles.iter().flat_map(|b| guild_stats_rows(region, b)).collect();
    let player_stats: Vec<BattlePlayerStatsRow> =
        battles.iter().flat_map(|b| player_stats_rows(region, b)).collect();
    let queue: Vec<BattleQueueRow> = battles
        .iter()
        .map(|b| BattleQueueRow {
            region,
            battle_id: b.id,
            ts: b.start_time,
        })
        .collect();

    if let Err(e) = battles::insert_summaries(&state.db, &summaries).await {
        error!(%region, error = %e, "failed to insert battle summaries");
        return;
    }
    if let Err(e) = battles::insert_alliance_stats(&state.db, &alliance_stats).await {
        error!(%region, error = %e, "failed to insert battle alliance stats");
        return;
    }
    if let Err(e) = battles::insert_guild_stats(&state.db, &guild_stats).await {
        error!(%region, error = %e, "failed to insert battle guild stats");
        return;
    }
    if let Err(e) = battles::insert_player_stats(&state.db, &player_stats).await {
        error!(%region, error = %e, "failed to insert battle player stats");
        return;
    }
    if let Err(e) = battles::insert_queue(&state.db, &queue).await {
        error!(%region, error = %e, "failed to insert battle queue rows");
        return;
    }

    info!(
        %region,
        battles = battles.len(),
        alliance_stats = alliance_stats.len(),
        guild_stats = guild_stats.len(),
        player_stats = player_stats.len(),
        "battleboard batch stored"
    );
}

/// Paginates up to `max_pages` pages, deduplicating battles by id across
/// pages (adjacent pages can overlap while the feed shifts under us). A
/// short page ends pagination early.
async fn fetch_battles(
    state: &AppState,
    region: Region,
    page_size: i64,
    max_pages: u32,
) -> Result<Vec<Battle>, UpstreamError> {
    let mut battles: Vec<Battle> = Vec::new();
    let mut seen: HashSet<i64> = HashSet::new();

    for page in 0..max_pages {
        let offset = i64::from(page) * page_size;
        let batch = fetch_page_with_retry(state, region, offset, page_size).await?;
        let batch_len = batch.len() as i64;
        for battle in batch {
            if seen.insert(battle.id) {
                battles.push(battle);
            }
        }
        if batch_len < page_size {
            break;
        }
    }

    Ok(battles)
}

async fn fetch_page_with_retry(
    state: &AppState,
    region: Region,
    offset: i64,
    limit: i64,
) -> Result<Vec<Battle>, UpstreamError> {
    let mut attempt = 1;
    loop {
        match state.upstream.fetch_battles(region, offset, limit).await {
            Ok(batch) => return Ok(batch),
            Err(e) if attempt < BATTLES_FETCH_ATTEMPTS => {
                let delay = retry_delay(attempt);
                warn!(
                    %region,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "battleboard fetch failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exponential retry delays: 1s, 2s, 4s, capped there.
fn retry_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(2);
    Duration::from_secs(1 << exp)
}

fn summary_row(region: Region, battle: &Battle) -> BattleSummaryRow {
    let mut alliances: Vec<_> = battle.alliances.values().collect();
    alliances.sort_by(|a, b| b.kills.cmp(&a.kills).then_with(|| a.name.cmp(&b.name)));
    let alliance_names = alliances
        .iter()
        .map(|a| format!("{} ({})", a.name, alliance_player_count(battle, &a.name)))
        .collect();

    let mut guilds: Vec<_> = battle.guilds.values().collect();
    guilds.sort_by(|a, b| b.kills.cmp(&a.kills).then_with(|| a.name.cmp(&b.name)));
    let guild_names = guilds
        .iter()
        .map(|g| format!("{} ({})", g.name, guild_player_count(battle, &g.name)))
        .collect();

    let mut players: Vec<_> = battle.players.values().collect();
    players.sort_by(|a, b| b.kills.cmp(&a.kills).then_with(|| a.name.cmp(&b.name)));
    let player_names = players.iter().map(|p| p.name.clone()).collect();

    BattleSummaryRow {
        region,
        battle_id: battle.id,
        start_time: battle.start_time,
        end_time: battle.end_time.unwrap_or(battle.start_time),
        total_players: battle.players.len() as i32,
        total_kills: battle.total_kills,
        total_fame: battle.total_fame,
        alliance_names,
        guild_names,
        player_names,
    }
}

fn alliance_player_count(battle: &Battle, alliance_name: &str) -> i32 {
    battle
        .players
        .values()
        .filter(|p| p.alliance_name.as_deref() == Some(alliance_name))
        .count() as i32
}

fn guild_player_count(battle: &Battle, guild_name: &str) -> i32 {
    battle
        .players
        .values()
        .filter(|p| p.guild_name.as_deref() == Some(guild_name))
        .count() as i32
}

fn alliance_stats_rows(region: Region, battle: &Battle) -> Vec<BattleAllianceStatsRow> {
    let mut rows: Vec<BattleAllianceStatsRow> = battle
        .alliances
        .values()
        .map(|alliance| BattleAllianceStatsRow {
            region,
            battle_id: battle.id,
            alliance_name: alliance.name.clone(),
            player_count: alliance_player_count(battle, &alliance.name),
            kills: alliance.kills,
            deaths: alliance.deaths,
            kill_fame: alliance.kill_fame,
        })
        .collect();
    rows.sort_by(|a, b| a.alliance_name.cmp(&b.alliance_name));
    rows
}

fn guild_stats_rows(region: Region, battle: &Battle) -> Vec<BattleGuildStatsRow> {
    let mut rows: Vec<BattleGuildStatsRow> = battle
        .guilds
        .values()
        .map(|guild| BattleGuildStatsRow {
            region,
            battle_id: battle.id,
            guild_name: guild.name.clone(),
            alliance_name: guild.alliance.clone(),
            player_count: guild_player_count(battle, &guild.name),
            kills: guild.kills,
            deaths: guild.deaths,
            kill_fame: guild.kill_fame,
        })
        .collect();
    rows.sort_by(|a, b| a.guild_name.cmp(&b.guild_name));
    rows
}

fn player_stats_rows(region: Region, battle: &Battle) -> Vec<BattlePlayerStatsRow> {
    let mut rows: Vec<BattlePlayerStatsRow> = battle
        .players
        .values()
        .map(|player| BattlePlayerStatsRow {
            region,
            battle_id: battle.id,
            player_name: player.name.clone(),
            guild_name: player.guild_name.clone(),
            alliance_name: player.alliance_name.clone(),
            kills: player.kills,
            deaths: player.deaths,
            kill_fame: player.kill_fame,
        })
        .collect();
    rows.sort_by(|a, b| a.player_name.cmp(&b.player_name));
    rows
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fameboard_shared::Region;

    use super::{alliance_stats_rows, guild_stats_rows, player_stats_rows, retry_delay, summary_row};
    use crate::upstream::Battle;

    fn battle() -> Battle {
        serde_json::from_value(serde_json::json!({
            "id": 900,
            "startTime": "2024-02-01T18:00:00Z",
            "endTime": "2024-02-01T18:20:00Z",
            "totalFame": 250000,
            "totalKills": 9,
            "players": {
                "p1": {"id": "p1", "name": "Anna", "kills": 5, "deaths": 0, "killFame": 150000,
                       "guildName": "Hammers", "allianceName": "NORTH"},
                "p2": {"id": "p2", "name": "Bert", "kills": 1, "deaths": 2, "killFame": 20000,
                       "guildName": "Hammers", "allianceName": "NORTH"},
                "p3": {"id": "p3", "name": "Cleo", "kills": 3, "deaths": 4, "killFame": 80000,
                       "guildName": "Anvils", "allianceName": "SOUTH"}
            },
            "guilds": {
                "g1": {"name": "Hammers", "kills": 6, "deaths": 2, "killFame": 170000,
                       "alliance": "NORTH"},
                "g2": {"name": "Anvils", "kills": 3, "deaths": 4, "killFame": 80000,
                       "alliance": "SOUTH"}
            },
            "alliances": {
                "a1": {"name": "NORTH", "kills": 6, "deaths": 2, "killFame": 170000},
                "a2": {"name": "SOUTH", "kills": 3, "deaths": 4, "killFame": 80000}
            }
        }))
        .expect("test battle should parse")
    }

    #[test]
    fn summary_orders_names_by_kills_with_participant_counts() {
        let summary = summary_row(Region::Americas, &battle());
        assert_eq!(summary.battle_id, 900);
        assert_eq!(summary.total_players, 3);
        assert_eq!(summary.alliance_names, ["NORTH (2)", "SOUTH (1)"]);
        assert_eq!(summary.guild_names, ["Hammers (2)", "Anvils (1)"]);
        assert_eq!(summary.player_names, ["Anna", "Cleo", "Bert"]);
    }

    #[test]
    fn alliance_rollups_carry_feed_totals_and_counts() {
        let rows = alliance_stats_rows(Region::Americas, &battle());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].alliance_name, "NORTH");
        assert_eq!(rows[0].player_count, 2);
        assert_eq!(rows[0].kills, 6);
        assert_eq!(rows[0].kill_fame, 170000);
        assert_eq!(rows[1].alliance_name, "SOUTH");
        assert_eq!(rows[1].player_count, 1);
    }

    #[test]
    fn guild_rollups_keep_their_alliance() {
        let rows = guild_stats_rows(Region::Europe, &battle());
        let hammers = rows
            .iter()
            .find(|r| r.guild_name == "Hammers")
            .expect("Hammers row");
        assert_eq!(hammers.alliance_name.as_deref(), Some("NORTH"));
        assert_eq!(hammers.player_count, 2);
        assert_eq!(hammers.deaths, 2);
    }

    #[test]
    fn player_rollups_cover_every_player() {
        let rows = player_stats_rows(Region::Asia, &battle());
        assert_eq!(rows.len(), 3);
        let anna = rows.iter().find(|r| r.player_name == "Anna").expect("Anna");
        assert_eq!(anna.kills, 5);
        assert_eq!(anna.guild_name.as_deref(), Some("Hammers"));
    }

    #[test]
    fn retry_delays_double_and_cap_at_four_seconds() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(4));
        assert_eq!(retry_delay(9), Duration::from_secs(4));
    }
}
