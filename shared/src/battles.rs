use serde::{Deserialize, Serialize};

/// One battle as listed by the battles endpoint. The three name lists are
/// ordered by kill count; alliance and guild entries carry their participant
/// count in parentheses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleListEntry {
    pub battle_id: i64,
    pub start_time: String,
    pub end_time: String,
    pub total_players: i32,
    pub total_kills: i32,
    pub total_fame: i64,
    pub alliance_names: Vec<String>,
    pub guild_names: Vec<String>,
    pub player_names: Vec<String>,
}

/// Per-alliance roll-up within one battle. `death_fame` and `ip` are null
/// until event-level enrichment has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleAllianceEntry {
    pub alliance_name: String,
    pub player_count: i32,
    pub kills: i32,
    pub deaths: i32,
    pub kill_fame: i64,
    pub death_fame: Option<i64>,
    pub ip: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleGuildEntry {
    pub guild_name: String,
    pub alliance_name: Option<String>,
    pub player_count: i32,
    pub kills: i32,
    pub deaths: i32,
    pub kill_fame: i64,
    pub death_fame: Option<i64>,
    pub ip: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePlayerEntry {
    pub player_name: String,
    pub guild_name: Option<String>,
    pub alliance_name: Option<String>,
    pub kills: i32,
    pub deaths: i32,
    pub kill_fame: i64,
    pub death_fame: Option<i64>,
    pub ip: Option<i32>,
    pub weapon: Option<String>,
    pub damage: Option<i64>,
    pub healing: Option<i64>,
}

/// One kill event within a battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleKillEntry {
    pub ts: String,
    pub killer_name: String,
    pub killer_ip: i32,
    pub killer_weapon: Option<String>,
    pub victim_name: String,
    pub victim_ip: i32,
    pub victim_weapon: Option<String>,
    pub fame: i64,
}

/// Full battle detail: summary plus roll-ups plus per-kill rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleDetail {
    pub summary: BattleListEntry,
    pub alliances: Vec<BattleAllianceEntry>,
    pub guilds: Vec<BattleGuildEntry>,
    pub players: Vec<BattlePlayerEntry>,
    pub kills: Vec<BattleKillEntry>,
}
