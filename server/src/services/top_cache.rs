use std::time::Duration;

use fameboard_shared::Region;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{TOP_LIMIT, TOP_REFRESH_SECS};
use crate::db::battles;
use crate::state::AppState;

/// Materializes the per-region leaderboards in memory on startup and every
/// five minutes, so the read API never aggregates battle tables per
/// request. A failed refresh keeps serving the previous snapshot.
pub async fn run(state: AppState, cancel: CancellationToken) {
    info!(refresh_secs = TOP_REFRESH_SECS, limit = TOP_LIMIT, "top board refresher started");

    refresh_once(&state).await;

    let mut interval = tokio::time::interval(Duration::from_secs(TOP_REFRESH_SECS));
    // Consume the immediate tick so the next refresh runs a full interval
    // after the startup one.
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("top board refresher stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        refresh_once(&state).await;
    }
}

async fn refresh_once(state: &AppState) {
    for region in Region::ALL {
        if let Err(e) = refresh_region(state, region).await {
            warn!(%region, error = %e, "top board refresh failed; serving stale data");
        }
    }
}

async fn refresh_region(state: &AppState, region: Region) -> Result<(), sqlx::Error> {
    let alliances = battles::top_alliances(&state.db, region, TOP_LIMIT).await?;
    let guilds = battles::top_guilds(&state.db, region, TOP_LIMIT).await?;
    let players = battles::top_players(&state.db, region, TOP_LIMIT).await?;

    let mut boards = state.top_boards.write().await;
    boards.alliances.insert(region, alliances);
    boards.guilds.insert(region, guilds);
    boards.players.insert(region, players);
    Ok(())
}
