use std::collections::{HashMap, HashSet};
use std::time::Duration;

use fameboard_shared::Region;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{BATTLE_EVENTS_PAGE_SIZE, BATTLE_EVENTS_PAGE_STEP, BATTLE_QUEUE_TICK_SECS};
use crate::db::battles::{
    self, AllianceEnrichment, BattleKillRow, GuildEnrichment, PlayerEnrichment,
};
use crate::state::AppState;
use crate::upstream::{Event, UpstreamError};

/// Drains the battle queue one battle per second, paginating through every
/// event of the battle and writing event-derived aggregates back onto the
/// roll-up rows the battleboard poller created.
pub async fn run(state: AppState, region: Region, cancel: CancellationToken) {
    info!(%region, "battle enrichment started");

    let mut interval = tokio::time::interval(Duration::from_secs(BATTLE_QUEUE_TICK_SECS));
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!(%region, "battle enrichment stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        run_once(&state, region).await;
    }
}

async fn run_once(state: &AppState, region: Region) {
    let queued = match battles::next_queued(&state.db, region).await {
        Ok(queued) => queued,
        Err(e) => {
            error!(%region, error = %e, "failed to read battle queue");
            return;
        }
    };
    let Some((battle_id, _ts)) = queued else {
        return;
    };

    if let Err(e) = enrich_battle(state, region, battle_id).await {
        // Queue row stays in place; the next tick retries.
        warn!(%region, battle_id, error = %e, "battle enrichment failed");
        if let Err(e) = battles::mark_enrichment_failed(&state.db, region, battle_id).await {
            error!(%region, battle_id, error = %e, "failed to bump battle queue error count");
        }
    }
}

async fn enrich_battle(state: &AppState, region: Region, battle_id: i64) -> Result<(), String> {
    let events = fetch_all_events(state, region, battle_id)
        .await
        .map_err(|e| format!("fetch battle events: {e}"))?;

    let alliances = alliance_aggregates(&events);
    let guilds = guild_aggregates(&events);
    let players = player_aggregates(&events);
    let kills = kill_rows(battle_id, &events);

    battles::apply_enrichment(
        &state.db, region, battle_id, &alliances, &guilds, &players, &kills,
    )
    .await
    .map_err(|e| format!("apply enrichment: {e}"))?;

    info!(
        %region,
        battle_id,
        events = events.len(),
        alliances = alliances.len(),
        guilds = guilds.len(),
        players = players.len(),
        kills = kills.len(),
        "battle enriched"
    );
    Ok(())
}

/// Fetches every event of the battle: pages of 51 with the offset advancing
/// by 50, until a short page. The one-row overlap is removed by the event-id
/// dedup pass.
async fn fetch_all_events(
    state: &AppState,
    region: Region,
    battle_id: i64,
) -> Result<Vec<Event>, UpstreamError> {
    let mut pages: Vec<Event> = Vec::new();
    let mut offset = 0i64;
    loop {
        let page = state
            .upstream
            .fetch_battle_events(region, battle_id, offset, BATTLE_EVENTS_PAGE_SIZE)
            .await?;
        let page_len = page.len() as i64;
        pages.extend(page);
        if page_len < BATTLE_EVENTS_PAGE_SIZE {
            break;
        }
        offset += BATTLE_EVENTS_PAGE_STEP;
    }
    Ok(dedup_by_event_id(pages))
}

fn dedup_by_event_id(events: Vec<Event>) -> Vec<Event> {
    let mut seen: HashSet<i64> = HashSet::new();
    events
        .into_iter()
        .filter(|event| seen.insert(event.event_id))
        .collect()
}

/// Per-alliance death fame and average item power. Every appearance as
/// killer or victim contributes that side's IP to the average; death fame
/// accumulates on the victim side only.
fn alliance_aggregates(events: &[Event]) -> Vec<AllianceEnrichment> {
    let mut appearances: HashMap<String, i64> = HashMap::new();
    let mut total_ip: HashMap<String, f64> = HashMap::new();
    let mut death_fame: HashMap<String, i64> = HashMap::new();

    for event in events {
        let alliance = &event.victim.alliance_name;
        if alliance.is_empty() {
            continue;
        }
        *appearances.entry(alliance.clone()).or_default() += 1;
        *total_ip.entry(alliance.clone()).or_default() += event.victim.average_item_power;
        *death_fame.entry(alliance.clone()).or_default() += event.total_victim_kill_fame;
    }
    for event in events {
        let alliance = &event.killer.alliance_name;
        if alliance.is_empty() {
            continue;
        }
        *appearances.entry(alliance.clone()).or_default() += 1;
        *total_ip.entry(alliance.clone()).or_default() += event.killer.average_item_power;
    }

    let mut rows: Vec<AllianceEnrichment> = appearances
        .iter()
        .map(|(name, count)| AllianceEnrichment {
            alliance_name: name.clone(),
            death_fame: death_fame.get(name).copied().unwrap_or(0),
            ip: (total_ip.get(name).copied().unwrap_or(0.0) / *count as f64) as i32,
        })
        .collect();
    rows.sort_by(|a, b| a.alliance_name.cmp(&b.alliance_name));
    rows
}

/// Same formulation as the alliance aggregates, at guild granularity.
fn guild_aggregates(events: &[Event]) -> Vec<GuildEnrichment> {
    let mut appearances: HashMap<String, i64> = HashMap::new();
    let mut total_ip: HashMap<String, f64> = HashMap::new();
    let mut death_fame: HashMap<String, i64> = HashMap::new();

    for event in events {
        let guild = &event.victim.guild_name;
        if guild.is_empty() {
            continue;
        }
        *appearances.entry(guild.clone()).or_default() += 1;
        *total_ip.entry(guild.clone()).or_default() += event.victim.average_item_power;
        *death_fame.entry(guild.clone()).or_default() += event.total_victim_kill_fame;
    }
    for event in events {
        let guild = &event.killer.guild_name;
        if guild.is_empty() {
            continue;
        }
        *appearances.entry(guild.clone()).or_default() += 1;
        *total_ip.entry(guild.clone()).or_default() += event.killer.average_item_power;
    }

    let mut rows: Vec<GuildEnrichment> = appearances
        .iter()
        .map(|(name, count)| GuildEnrichment {
            guild_name: name.clone(),
            death_fame: death_fame.get(name).copied().unwrap_or(0),
            ip: (total_ip.get(name).copied().unwrap_or(0.0) / *count as f64) as i32,
        })
        .collect();
    rows.sort_by(|a, b| a.guild_name.cmp(&b.guild_name));
    rows
}

/// Per-player enrichment. IP and main-hand weapon come from the first event
/// that mentions the player; kills iterate before deaths so a player who
/// both killed and died is recorded with the gear of their first killing
/// blow. Damage and healing sum over participant entries.
fn player_aggregates(events: &[Event]) -> Vec<PlayerEnrichment> {
    let mut first_seen: HashMap<String, (f64, Option<String>)> = HashMap::new();
    let mut death_fame: HashMap<String, i64> = HashMap::new();
    let mut damage: HashMap<String, i64> = HashMap::new();
    let mut healing: HashMap<String, i64> = HashMap::new();

    for event in events {
        let killer = &event.killer;
        if killer.name.is_empty() {
            continue;
        }
        first_seen
            .entry(killer.name.clone())
            .or_insert_with(|| (killer.average_item_power, killer.main_hand()));
    }
    for event in events {
        let victim = &event.victim;
        if victim.name.is_empty() {
            continue;
        }
        *death_fame.entry(victim.name.clone()).or_default() += event.total_victim_kill_fame;
        first_seen
            .entry(victim.name.clone())
            .or_insert_with(|| (victim.average_item_power, victim.main_hand()));
    }
    for event in events {
        for participant in &event.participants {
            if participant.name.is_empty() {
                continue;
            }
            *damage.entry(participant.name.clone()).or_default() +=
                participant.damage_done as i64;
            *healing.entry(participant.name.clone()).or_default() +=
                participant.support_healing_done as i64;
        }
    }

    let mut rows: Vec<PlayerEnrichment> = first_seen
        .iter()
        .map(|(name, (ip, weapon))| PlayerEnrichment {
            player_name: name.clone(),
            death_fame: death_fame.get(name).copied().unwrap_or(0),
            ip: *ip as i32,
            weapon: weapon.clone(),
            damage: damage.get(name).copied().unwrap_or(0),
            healing: healing.get(name).copied().unwrap_or(0),
        })
        .collect();
    rows.sort_by(|a, b| a.player_name.cmp(&b.player_name));
    rows
}

fn kill_rows(battle_id: i64, events: &[Event]) -> Vec<BattleKillRow> {
    events
        .iter()
        .map(|event| BattleKillRow {
            battle_id,
            ts: event.timestamp,
            killer_name: event.killer.name.clone(),
            killer_ip: event.killer.average_item_power as i32,
            killer_weapon: event.killer.main_hand(),
            victim_name: event.victim.name.clone(),
            victim_ip: event.victim.average_item_power as i32,
            victim_weapon: event.victim.main_hand(),
            fame: event.total_victim_kill_fame,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        alliance_aggregates, dedup_by_event_id, guild_aggregates, kill_rows, player_aggregates,
    };
    use crate::upstream::Event;

    fn kill_event(
        event_id: i64,
        fame: i64,
        killer: (&str, &str, &str, f64, Option<&str>),
        victim: (&str, &str, &str, f64, Option<&str>),
    ) -> Event {
        let equipment = |weapon: Option<&str>| match weapon {
            Some(weapon) => serde_json::json!({"MainHand": {"Type": weapon}}),
            None => serde_json::json!({}),
        };
        let (k_name, k_guild, k_alliance, k_ip, k_weapon) = killer;
        let (v_name, v_guild, v_alliance, v_ip, v_weapon) = victim;
        serde_json::from_value(serde_json::json!({
            "EventId": event_id,
            "TimeStamp": "2024-03-01T12:00:00Z",
            "TotalVictimKillFame": fame,
            "Killer": {
                "Id": k_name, "Name": k_name, "GuildName": k_guild,
                "AllianceName": k_alliance, "AverageItemPower": k_ip,
                "Equipment": equipment(k_weapon)
            },
            "Victim": {
                "Id": v_name, "Name": v_name, "GuildName": v_guild,
                "AllianceName": v_alliance, "AverageItemPower": v_ip,
                "Equipment": equipment(v_weapon)
            }
        }))
        .expect("test event should parse")
    }

    #[test]
    fn alliance_ip_averages_over_both_sides() {
        // Two mirrored kills between alliances A1 and A2.
        let events = [
            kill_event(
                1,
                1000,
                ("k1", "G1", "A1", 1400.0, None),
                ("v1", "G2", "A2", 1300.0, None),
            ),
            kill_event(
                2,
                500,
                ("v1", "G2", "A2", 1320.0, None),
                ("k1", "G1", "A1", 1400.0, None),
            ),
        ];

        let rows = alliance_aggregates(&events);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].alliance_name, "A1");
        assert_eq!(rows[0].ip, 1400);
        assert_eq!(rows[0].death_fame, 500);
        assert_eq!(rows[1].alliance_name, "A2");
        assert_eq!(rows[1].ip, 1310);
        assert_eq!(rows[1].death_fame, 1000);
    }

    #[test]
    fn guild_aggregates_mirror_the_alliance_formulation() {
        let events = [kill_event(
            1,
            750,
            ("k1", "Hammers", "", 1500.0, None),
            ("v1", "Anvils", "", 1100.0, None),
        )];
        let rows = guild_aggregates(&events);
        assert_eq!(rows.len(), 2);
        let anvils = rows.iter().find(|r| r.guild_name == "Anvils").expect("Anvils");
        assert_eq!(anvils.death_fame, 750);
        assert_eq!(anvils.ip, 1100);
        let hammers = rows.iter().find(|r| r.guild_name == "Hammers").expect("Hammers");
        assert_eq!(hammers.death_fame, 0);
        assert_eq!(hammers.ip, 1500);
    }

    #[test]
    fn player_gear_capture_prefers_the_first_killing_blow() {
        // X dies first (event 1, spear), then kills (event 2, sword). The
        // kills pass runs before the deaths pass, so the sword wins.
        let events = [
            kill_event(
                1,
                300,
                ("y", "", "", 1000.0, Some("T7_SPEAR")),
                ("x", "", "", 1200.0, Some("T6_SPEAR")),
            ),
            kill_event(
                2,
                400,
                ("x", "", "", 1350.0, Some("T8_SWORD")),
                ("y", "", "", 1000.0, Some("T7_SPEAR")),
            ),
        ];

        let rows = player_aggregates(&events);
        let x = rows.iter().find(|r| r.player_name == "x").expect("player x");
        assert_eq!(x.ip, 1350, "IP from the first event where x killed");
        assert_eq!(x.weapon.as_deref(), Some("T8_SWORD"));
        assert_eq!(x.death_fame, 300);
    }

    #[test]
    fn player_damage_and_healing_sum_over_participants() {
        let mut event = kill_event(
            7,
            100,
            ("k", "", "", 1000.0, None),
            ("v", "", "", 900.0, None),
        );
        event.participants = vec![
            serde_json::from_value(serde_json::json!({
                "Id": "k", "Name": "k", "DamageDone": 150.9, "SupportHealingDone": 20.0
            }))
            .expect("participant"),
            serde_json::from_value(serde_json::json!({
                "Id": "h", "Name": "h", "DamageDone": 0.0, "SupportHealingDone": 512.0
            }))
            .expect("participant"),
        ];

        let rows = player_aggregates(&[event]);
        let k = rows.iter().find(|r| r.player_name == "k").expect("player k");
        assert_eq!(k.damage, 150);
        assert_eq!(k.healing, 20);
        // "h" never appears as killer or victim, so it gets no row even
        // though it dealt healing.
        assert!(rows.iter().all(|r| r.player_name != "h"));
    }

    #[test]
    fn kill_rows_copy_event_fields_verbatim() {
        let events = [kill_event(
            11,
            12500,
            ("k1", "G", "A", 1400.7, Some("T8_SWORD")),
            ("v1", "G2", "B", 1288.2, None),
        )];
        let rows = kill_rows(42, &events);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].battle_id, 42);
        assert_eq!(rows[0].killer_ip, 1400);
        assert_eq!(rows[0].killer_weapon.as_deref(), Some("T8_SWORD"));
        assert_eq!(rows[0].victim_ip, 1288);
        assert!(rows[0].victim_weapon.is_none());
        assert_eq!(rows[0].fame, 12500);
    }

    #[test]
    fn page_overlap_is_removed_by_event_id() {
        let duplicated = vec![
            kill_event(1, 10, ("a", "", "", 1.0, None), ("b", "", "", 1.0, None)),
            kill_event(2, 10, ("a", "", "", 1.0, None), ("b", "", "", 1.0, None)),
            kill_event(2, 10, ("a", "", "", 1.0, None), ("b", "", "", 1.0, None)),
            kill_event(3, 10, ("a", "", "", 1.0, None), ("b", "", "", 1.0, None)),
        ];
        let unique = dedup_by_event_id(duplicated);
        let ids: Vec<i64> = unique.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, [1, 2, 3]);
    }
}
