//! Pipeline configuration, loaded once from the environment at startup.
//!
//! Mirrors the teacher's `models::Config::from_env` pattern: every field has
//! a sensible default so the binary runs from a bare `.env`, and nothing is
//! read from a module-level global afterward (spec.md §9's "global mutable
//! state" redesign flag).

#[derive(Debug, Clone)]
pub struct Config {
    pub structure_id: i64,
    pub region_id: i64,
    pub doctrine_target: i64,
    pub history_lookback_days: i64,
    pub history_concurrency: usize,
    pub request_timeout_seconds: u64,
    pub max_retries_per_page: u32,
    pub retry_backoff_seconds: u64,
    pub fresh_history: bool,

    pub database_path: String,
    pub esi_base_url: String,
    pub comparator_base_url: String,
    pub comparator_region_id: i64,
    pub user_agent: String,
    pub fit_catalog_path: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let structure_id = env_or("STRUCTURE_ID", 1_035_466_617_946i64);
        let region_id = env_or("REGION_ID", 10_000_002i64);
        let doctrine_target = env_or("DOCTRINE_TARGET", 20i64);
        let history_lookback_days = env_or("HISTORY_LOOKBACK_DAYS", 30i64);
        let history_concurrency = env_or::<usize>("HISTORY_CONCURRENCY", 8).min(16);
        let request_timeout_seconds = env_or("REQUEST_TIMEOUT_SECONDS", 10u64);
        let max_retries_per_page = env_or("MAX_RETRIES_PER_PAGE", 5u32);
        let retry_backoff_seconds = env_or("RETRY_BACKOFF_SECONDS", 3u64);
        let fresh_history = env_or("FRESH_HISTORY", true);

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./vale_intel.sqlite".to_string());
        let esi_base_url = std::env::var("ESI_BASE_URL")
            .unwrap_or_else(|_| "https://esi.evetech.net/latest".to_string());
        let comparator_base_url = std::env::var("COMPARATOR_BASE_URL")
            .unwrap_or_else(|_| "https://market.fuzzwork.co.uk".to_string());
        let comparator_region_id = env_or("COMPARATOR_REGION_ID", region_id);
        let user_agent = std::env::var("USER_AGENT").unwrap_or_else(|_| {
            "vale-intel/0.1 (structure market intelligence; contact: operator@example.com)"
                .to_string()
        });
        let fit_catalog_path =
            std::env::var("FIT_CATALOG_PATH").unwrap_or_else(|_| "./fits.json".to_string());

        Ok(Self {
            structure_id,
            region_id,
            doctrine_target,
            history_lookback_days,
            history_concurrency,
            request_timeout_seconds,
            max_retries_per_page,
            retry_backoff_seconds,
            fresh_history,
            database_path,
            esi_base_url,
            comparator_base_url,
            comparator_region_id,
            user_agent,
            fit_catalog_path,
        })
    }
}
