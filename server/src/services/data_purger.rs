use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PURGE_INTERVAL_SECS;
use crate::db::battles;
use crate::state::AppState;

/// Daily deletion of battle data older than one year.
pub async fn run(state: AppState, cancel: CancellationToken) {
    info!(interval_secs = PURGE_INTERVAL_SECS, "data purger started");

    purge_once(&state).await;

    let mut interval = tokio::time::interval(Duration::from_secs(PURGE_INTERVAL_SECS));
    // Consume the immediate tick so the next purge runs a full interval out.
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("data purger stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        purge_once(&state).await;
    }
}

async fn purge_once(state: &AppState) {
    let start = Instant::now();
    match battles::purge_old(&state.db).await {
        Ok(()) => info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "battle data purge succeeded"
        ),
        Err(e) => warn!(error = %e, "battle data purge failed"),
    }
}
