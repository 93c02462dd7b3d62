use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::METRICS_INTERVAL_SECS;
use crate::db::metrics;
use crate::state::AppState;

/// Inserts pipeline counters into the metrics time series every five
/// minutes.
pub async fn run(state: AppState, cancel: CancellationToken) {
    info!(interval_secs = METRICS_INTERVAL_SECS, "metrics collector started");

    collect_once(&state).await;

    let mut interval = tokio::time::interval(Duration::from_secs(METRICS_INTERVAL_SECS));
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("metrics collector stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        collect_once(&state).await;
    }
}

async fn collect_once(state: &AppState) {
    let start = Instant::now();
    match metrics::insert_counters(&state.db).await {
        Ok(()) => info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "metrics collection succeeded"
        ),
        Err(e) => warn!(error = %e, "metrics collection failed"),
    }
}
