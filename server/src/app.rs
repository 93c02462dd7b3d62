use axum::Router;
use axum::routing::get;
use tower_http::compression::CompressionLayer;

use crate::routes;
use crate::state::AppState;

pub(crate) fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::api::health))
        .route(
            "/api/{region}/players/{player_id}",
            get(routes::api::player),
        )
        .route(
            "/api/{region}/players/{player_id}/pvp",
            get(routes::api::player_pvp),
        )
        .route(
            "/api/{region}/players/{player_id}/pve",
            get(routes::api::player_pve),
        )
        .route(
            "/api/{region}/players/{player_id}/gathering",
            get(routes::api::player_gathering),
        )
        .route("/api/{region}/search", get(routes::api::search_players))
        .route(
            "/api/{region}/top/alliances",
            get(routes::api::top_alliances),
        )
        .route("/api/{region}/top/guilds", get(routes::api::top_guilds))
        .route("/api/{region}/top/players", get(routes::api::top_players))
        .route("/api/{region}/battles", get(routes::api::list_battles))
        .route(
            "/api/{region}/battles/{battle_id}",
            get(routes::api::get_battle),
        )
        .route("/api/metrics/{metric}", get(routes::api::metric_series))
        .layer(CompressionLayer::new())
        .with_state(state)
}
