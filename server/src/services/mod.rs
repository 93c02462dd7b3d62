pub mod battle_enricher;
pub mod battleboard_poller;
pub mod data_purger;
pub mod killboard_poller;
pub mod metrics_collector;
pub mod player_poller;
pub mod top_cache;
