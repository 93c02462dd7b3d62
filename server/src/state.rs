use std::collections::HashMap;
use std::sync::Arc;

use fameboard_shared::boards::{TopAlliance, TopGuild, TopPlayer};
use fameboard_shared::Region;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::upstream::Client;

/// In-memory leaderboard snapshots per region. A region is absent until its
/// first successful refresh; the read API surfaces that as 503.
#[derive(Debug, Default)]
pub struct TopBoards {
    pub alliances: HashMap<Region, Vec<TopAlliance>>,
    pub guilds: HashMap<Region, Vec<TopGuild>>,
    pub players: HashMap<Region, Vec<TopPlayer>>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Rate-limited upstream client, shared by every poller in every region.
    pub upstream: Arc<Client>,
    pub top_boards: Arc<RwLock<TopBoards>>,
}

impl AppState {
    pub fn new(db: PgPool, upstream: Client) -> Self {
        Self {
            db,
            upstream: Arc::new(upstream),
            top_boards: Arc::new(RwLock::new(TopBoards::default())),
        }
    }
}
