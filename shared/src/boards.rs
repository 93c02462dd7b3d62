use serde::{Deserialize, Serialize};

/// Leaderboard row: an alliance ranked by kill fame over the last 30 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopAlliance {
    pub alliance_name: String,
    pub battles: i64,
    pub kills: i64,
    pub deaths: i64,
    pub kill_fame: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopGuild {
    pub guild_name: String,
    pub battles: i64,
    pub kills: i64,
    pub deaths: i64,
    pub kill_fame: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopPlayer {
    pub player_name: String,
    pub battles: i64,
    pub kills: i64,
    pub deaths: i64,
    pub kill_fame: i64,
}

/// Column-parallel series for one metric, bucketed by the requested
/// granularity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSeries {
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
}
