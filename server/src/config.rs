use std::time::Duration;

/// Environment variable naming the key/value config file; `.env` by default.
/// The file is loaded into the process environment at startup, so plain
/// environment variables work the same way.
pub const CONFIG_FILE_ENV: &str = "FAMEBOARD_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = ".env";

pub const USER_AGENT: &str = "fameboard-ingest/0.1";
pub const UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 15;

pub const DEFAULT_EVENTS_PAGE_SIZE: i64 = 50;
pub const DEFAULT_EVENTS_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_PLAYER_BATCH: i64 = 100;
pub const DEFAULT_PLAYER_WORKERS: usize = 5;
pub const DEFAULT_BATTLES_PAGE_SIZE: i64 = 51;
pub const DEFAULT_BATTLES_MAX_PAGES: u32 = 1;
pub const DEFAULT_BATTLES_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_API_PORT: u16 = 8080;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Battle event pages are requested at size 51 but the offset advances by
/// 50, so consecutive pages overlap by one row. The enricher deduplicates
/// by event id; keeping the overlap means a row can never fall between
/// pages while the battle is still being written upstream.
pub const BATTLE_EVENTS_PAGE_SIZE: i64 = 51;
pub const BATTLE_EVENTS_PAGE_STEP: i64 = 50;

pub const BATTLES_FETCH_ATTEMPTS: u32 = 3;

pub const PLAYER_POLL_TICK_SECS: u64 = 1;
pub const BATTLE_QUEUE_TICK_SECS: u64 = 1;

pub const TOP_REFRESH_SECS: u64 = 300;
pub const TOP_LIMIT: i64 = 100;

pub const PURGE_INTERVAL_SECS: u64 = 86400;
pub const METRICS_INTERVAL_SECS: u64 = 300;

pub const SEARCH_LIMIT: i64 = 10;

pub fn events_page_size() -> i64 {
    positive_i64("FAMEBOARD_EVENTS_PAGE_SIZE", DEFAULT_EVENTS_PAGE_SIZE)
}

pub fn events_interval() -> Duration {
    positive_secs("FAMEBOARD_EVENTS_INTERVAL_SECS", DEFAULT_EVENTS_INTERVAL_SECS)
}

pub fn player_batch() -> i64 {
    positive_i64("FAMEBOARD_PLAYER_BATCH", DEFAULT_PLAYER_BATCH)
}

pub fn player_workers() -> usize {
    std::env::var("FAMEBOARD_PLAYER_WORKERS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_PLAYER_WORKERS)
}

pub fn battles_page_size() -> i64 {
    positive_i64("FAMEBOARD_BATTLES_PAGE_SIZE", DEFAULT_BATTLES_PAGE_SIZE)
}

pub fn battles_max_pages() -> u32 {
    std::env::var("FAMEBOARD_BATTLES_MAX_PAGES")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BATTLES_MAX_PAGES)
}

pub fn battles_interval() -> Duration {
    positive_secs(
        "FAMEBOARD_BATTLES_INTERVAL_SECS",
        DEFAULT_BATTLES_INTERVAL_SECS,
    )
}

pub fn api_port() -> u16 {
    std::env::var("API_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_API_PORT)
}

pub fn db_max_connections() -> u32 {
    std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
}

fn positive_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn positive_secs(key: &str, default: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    #[test]
    fn defaults_apply_when_unset() {
        temp_env::with_vars_unset(
            [
                "FAMEBOARD_EVENTS_PAGE_SIZE",
                "FAMEBOARD_EVENTS_INTERVAL_SECS",
                "FAMEBOARD_PLAYER_BATCH",
                "FAMEBOARD_PLAYER_WORKERS",
                "API_PORT",
            ],
            || {
                assert_eq!(super::events_page_size(), 50);
                assert_eq!(super::events_interval(), Duration::from_secs(10));
                assert_eq!(super::player_batch(), 100);
                assert_eq!(super::player_workers(), 5);
                assert_eq!(super::api_port(), 8080);
            },
        );
    }

    #[test]
    fn overrides_are_honored() {
        temp_env::with_vars(
            [
                ("FAMEBOARD_EVENTS_PAGE_SIZE", Some("25")),
                ("FAMEBOARD_BATTLES_MAX_PAGES", Some("3")),
                ("FAMEBOARD_PLAYER_WORKERS", Some("12")),
            ],
            || {
                assert_eq!(super::events_page_size(), 25);
                assert_eq!(super::battles_max_pages(), 3);
                assert_eq!(super::player_workers(), 12);
            },
        );
    }

    #[test]
    fn invalid_and_zero_values_fall_back_to_defaults() {
        temp_env::with_vars(
            [
                ("FAMEBOARD_EVENTS_PAGE_SIZE", Some("0")),
                ("FAMEBOARD_BATTLES_INTERVAL_SECS", Some("sixty")),
                ("DB_MAX_CONNECTIONS", Some("-4")),
            ],
            || {
                assert_eq!(super::events_page_size(), 50);
                assert_eq!(super::battles_interval(), Duration::from_secs(60));
                assert_eq!(super::db_max_connections(), 10);
            },
        );
    }
}
