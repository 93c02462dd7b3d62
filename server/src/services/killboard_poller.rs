use std::collections::HashSet;

use chrono::{DateTime, Utc};
use fameboard_shared::Region;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config;
use crate::db::player_polls::{self, PlayerPoll};
use crate::state::AppState;
use crate::upstream::{Event, Participant};

/// Pulls the first killboard page every tick and stages every participant
/// as a player-poll row due immediately. Discovery is the only way players
/// enter the pipeline.
pub async fn run(state: AppState, region: Region, cancel: CancellationToken) {
    let poll_interval = config::events_interval();
    let page_size = config::events_page_size();
    info!(
        %region,
        interval_secs = poll_interval.as_secs(),
        page_size,
        "killboard polling started"
    );

    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!(%region, "killboard poller stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        run_once(&state, region, page_size).await;
    }
}

async fn run_once(state: &AppState, region: Region, page_size: i64) {
    let events = match state.upstream.fetch_events(region, page_size, 0).await {
        Ok(events) => events,
        Err(e) => {
            warn!(%region, error = %e, "failed to fetch killboard events");
            return;
        }
    };
    if events.is_empty() {
        return;
    }

    let discovered = collect_players(region, &events, Utc::now());
    if discovered.is_empty() {
        return;
    }

    let count = discovered.len();
    if let Err(e) = player_polls::upsert_discovered(&state.db, &discovered).await {
        error!(%region, error = %e, players = count, "upsert of discovered players failed");
        return;
    }
    info!(%region, events = events.len(), players = count, "upserted discovered players");
}

/// Walks killer, victim, participants and group members of every event,
/// deduplicating by player id within the batch. Each discovered player is
/// due immediately, with killboard activity taken from the event timestamp.
fn collect_players(region: Region, events: &[Event], now: DateTime<Utc>) -> Vec<PlayerPoll> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows = Vec::new();

    for event in events {
        let mut add = |participant: &Participant| {
            if participant.id.is_empty() || !seen.insert(participant.id.clone()) {
                return;
            }
            rows.push(PlayerPoll {
                region,
                player_id: participant.id.clone(),
                next_poll_at: now,
                last_poll_at: None,
                error_count: 0,
                last_encountered: None,
                killboard_last_activity: Some(event.timestamp),
                other_last_activity: None,
            });
        };

        add(&event.killer);
        add(&event.victim);
        for participant in &event.participants {
            add(participant);
        }
        for member in &event.group_members {
            add(member);
        }
    }

    rows
}
