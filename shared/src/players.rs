use serde::{Deserialize, Serialize};

/// Identity and headline fame for a player, from the latest successful poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub player_id: String,
    pub name: String,
    pub guild_name: Option<String>,
    pub alliance_name: Option<String>,
    pub alliance_tag: Option<String>,
    pub kill_fame: i64,
    pub death_fame: i64,
    pub fame_ratio: Option<f64>,
    /// When the latest snapshot was taken, unix milliseconds.
    pub polled_at: i64,
}

/// A prefix-search hit over the latest player rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSearchHit {
    pub player_id: String,
    pub name: String,
    pub guild_name: Option<String>,
    pub alliance_name: Option<String>,
}

/// Column-parallel PvP fame series over a player's snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PvpSeries {
    pub timestamps: Vec<i64>,
    pub kill_fame: Vec<i64>,
    pub death_fame: Vec<i64>,
    pub fame_ratio: Vec<Option<f64>>,
}

/// Column-parallel PvE fame series over a player's snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PveSeries {
    pub timestamps: Vec<i64>,
    pub total: Vec<i64>,
    pub royal: Vec<i64>,
    pub outlands: Vec<i64>,
    pub avalon: Vec<i64>,
    pub hellgate: Vec<i64>,
    pub corrupted: Vec<i64>,
    pub mists: Vec<i64>,
}

/// Column-parallel gathering fame series (all resources combined).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatheringSeries {
    pub timestamps: Vec<i64>,
    pub total: Vec<i64>,
    pub royal: Vec<i64>,
    pub outlands: Vec<i64>,
    pub avalon: Vec<i64>,
}
