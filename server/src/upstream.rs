use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fameboard_shared::Region;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;

use crate::config::{UPSTREAM_HTTP_TIMEOUT_SECS, USER_AGENT};

/// Upstream requests per region per second; also the burst capacity.
const UPSTREAM_RATE: NonZeroU32 = NonZeroU32::new(4).unwrap();

const ERROR_BODY_PREVIEW_BYTES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// 404 on the player endpoint. Terminal: the poll row is deleted.
    #[error("player not found upstream")]
    NotFound,
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One token bucket per region, shared by every caller. Constructed once at
/// startup and injected into the client; there is no global limiter state.
pub struct RegionLimiters {
    americas: DefaultDirectRateLimiter,
    europe: DefaultDirectRateLimiter,
    asia: DefaultDirectRateLimiter,
}

impl RegionLimiters {
    pub fn new() -> Self {
        Self {
            americas: RateLimiter::direct(Quota::per_second(UPSTREAM_RATE)),
            europe: RateLimiter::direct(Quota::per_second(UPSTREAM_RATE)),
            asia: RateLimiter::direct(Quota::per_second(UPSTREAM_RATE)),
        }
    }

    fn limiter(&self, region: Region) -> &DefaultDirectRateLimiter {
        match region {
            Region::Americas => &self.americas,
            Region::Europe => &self.europe,
            Region::Asia => &self.asia,
        }
    }

    /// Waits for a token. Cancel-safe: dropping the future releases nothing
    /// because the token is only consumed when the wait completes.
    pub async fn acquire(&self, region: Region) {
        self.limiter(region).until_ready().await;
    }
}

impl Default for RegionLimiters {
    fn default() -> Self {
        Self::new()
    }
}

pub fn base_url(region: Region) -> &'static str {
    match region {
        Region::Americas => "https://gameinfo.albiononline.com",
        Region::Europe => "https://gameinfo-ams.albiononline.com",
        Region::Asia => "https://gameinfo-sgp.albiononline.com",
    }
}

/// Rate-limited JSON client for the three regional gameinfo endpoints.
pub struct Client {
    http: reqwest::Client,
    limiters: RegionLimiters,
}

impl Client {
    pub fn new(limiters: RegionLimiters) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(UPSTREAM_HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                panic!("failed to build timeout-configured HTTP client: {e}");
            });
        Self { http, limiters }
    }

    pub async fn fetch_player(
        &self,
        region: Region,
        player_id: &str,
    ) -> Result<PlayerRecord, UpstreamError> {
        let url = format!("{}/api/gameinfo/players/{player_id}", base_url(region));
        let query = vec![("guid", cache_bust_guid()), ("t", nanos_now())];
        match self.fetch_json(region, url, query).await {
            Err(UpstreamError::Status { status: 404, .. }) => Err(UpstreamError::NotFound),
            other => other,
        }
    }

    pub async fn fetch_events(
        &self,
        region: Region,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Event>, UpstreamError> {
        let url = format!("{}/api/gameinfo/events", base_url(region));
        let query = vec![
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("guid", cache_bust_guid()),
        ];
        self.fetch_json(region, url, query).await
    }

    pub async fn fetch_battles(
        &self,
        region: Region,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Battle>, UpstreamError> {
        let url = format!("{}/api/gameinfo/battles", base_url(region));
        let query = vec![
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("sort", "recent".to_string()),
            ("guid", cache_bust_guid()),
            ("t", nanos_now()),
        ];
        self.fetch_json(region, url, query).await
    }

    pub async fn fetch_battle_events(
        &self,
        region: Region,
        battle_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Event>, UpstreamError> {
        let url = format!("{}/api/gameinfo/events/battle/{battle_id}", base_url(region));
        let query = vec![
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
            ("guid", cache_bust_guid()),
        ];
        self.fetch_json(region, url, query).await
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        region: Region,
        url: String,
        query: Vec<(&'static str, String)>,
    ) -> Result<T, UpstreamError> {
        self.limiters.acquire(region).await;

        let resp = self.http.get(url).query(&query).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body: body_preview(&bytes),
            });
        }
        serde_json::from_slice(&bytes).map_err(UpstreamError::Decode)
    }
}

/// Fresh 128-bit identifier sent as `guid` on every request to defeat
/// upstream caching. Falls back to the nanosecond clock if entropy is
/// unavailable.
fn cache_bust_guid() -> String {
    let mut buf = [0u8; 16];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => hex::encode(buf),
        Err(_) => nanos_now(),
    }
}

fn nanos_now() -> String {
    Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string()
}

fn body_preview(bytes: &[u8]) -> String {
    let cut = bytes.len().min(ERROR_BODY_PREVIEW_BYTES);
    String::from_utf8_lossy(&bytes[..cut]).into_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    pub event_id: i64,
    #[serde(rename = "TimeStamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub battle_id: i64,
    #[serde(default)]
    pub total_victim_kill_fame: i64,
    pub killer: Participant,
    pub victim: Participant,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub group_members: Vec<Participant>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Participant {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub guild_id: String,
    #[serde(default)]
    pub guild_name: String,
    #[serde(default)]
    pub alliance_id: String,
    #[serde(default)]
    pub alliance_name: String,
    #[serde(default)]
    pub alliance_tag: String,
    #[serde(default)]
    pub average_item_power: f64,
    #[serde(default)]
    pub damage_done: f64,
    #[serde(default)]
    pub support_healing_done: f64,
    /// Equipment slots keyed by name; slots are present but null when empty.
    #[serde(default)]
    pub equipment: HashMap<String, Option<EquipmentItem>>,
}

impl Participant {
    pub fn main_hand(&self) -> Option<String> {
        self.equipment
            .get("MainHand")
            .and_then(|item| item.as_ref())
            .map(|item| item.item_type.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentItem {
    #[serde(rename = "Type")]
    pub item_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub guild_id: String,
    #[serde(default)]
    pub guild_name: String,
    #[serde(default)]
    pub alliance_id: String,
    #[serde(default)]
    pub alliance_name: String,
    #[serde(default)]
    pub alliance_tag: String,
    #[serde(default)]
    pub kill_fame: i64,
    #[serde(default)]
    pub death_fame: i64,
    #[serde(default)]
    pub fame_ratio: f64,
    #[serde(default)]
    pub fishing_fame: i64,
    #[serde(default)]
    pub farming_fame: i64,
    #[serde(default)]
    pub crystal_league: i64,
    #[serde(default)]
    pub lifetime_statistics: LifetimeStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifetimeStats {
    #[serde(rename = "PvE", default)]
    pub pve: PveStats,
    #[serde(default)]
    pub gathering: GatheringStats,
    #[serde(default)]
    pub crafting: CraftingStats,
    /// Upstream "last activity" timestamp. Missing means the payload is
    /// considered corrupt and the player is dropped from polling.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PveStats {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub royal: i64,
    #[serde(default)]
    pub outlands: i64,
    #[serde(default)]
    pub avalon: i64,
    #[serde(default)]
    pub hellgate: i64,
    #[serde(default)]
    pub corrupted_dungeon: i64,
    #[serde(default)]
    pub mists: i64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatheringStats {
    #[serde(default)]
    pub fiber: GatheringSplit,
    #[serde(default)]
    pub hide: GatheringSplit,
    #[serde(default)]
    pub ore: GatheringSplit,
    #[serde(default)]
    pub rock: GatheringSplit,
    #[serde(default)]
    pub wood: GatheringSplit,
    #[serde(default)]
    pub all: GatheringSplit,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatheringSplit {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub royal: i64,
    #[serde(default)]
    pub outlands: i64,
    #[serde(default)]
    pub avalon: i64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CraftingStats {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub royal: i64,
    #[serde(default)]
    pub outlands: i64,
    #[serde(default)]
    pub avalon: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    /// Absent while a battle is still open upstream.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_fame: i64,
    #[serde(default)]
    pub total_kills: i32,
    #[serde(default)]
    pub players: HashMap<String, BattlePlayer>,
    #[serde(default)]
    pub guilds: HashMap<String, BattleGuild>,
    #[serde(default)]
    pub alliances: HashMap<String, BattleAlliance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattlePlayer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kills: i32,
    #[serde(default)]
    pub deaths: i32,
    #[serde(default)]
    pub kill_fame: i64,
    #[serde(default)]
    pub guild_name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub alliance_name: Option<String>,
    #[serde(default)]
    pub alliance_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleGuild {
    pub name: String,
    #[serde(default)]
    pub kills: i32,
    #[serde(default)]
    pub deaths: i32,
    #[serde(default)]
    pub kill_fame: i64,
    #[serde(default)]
    pub alliance: Option<String>,
    #[serde(default)]
    pub alliance_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleAlliance {
    pub name: String,
    #[serde(default)]
    pub kills: i32,
    #[serde(default)]
    pub deaths: i32,
    #[serde(default)]
    pub kill_fame: i64,
}
