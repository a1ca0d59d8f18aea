use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

use crate::identity::DEFAULT_CACHE_CAPACITY;
use crate::migrate::DEFAULT_BATCH_SIZE;
use crate::retry::RetryPolicy;
use crate::stats::StatsCacheConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    /// MaxMind City database path; `None` records visits with unknown geo.
    pub geoip_db_path: Option<String>,
    #[serde(skip)]
    pub retry: RetryPolicy,
    pub migration_batch_size: u32,
    pub identity_cache_capacity: usize,
    pub stats_cache: Option<StatsCacheSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatsCacheSettings {
    pub capacity: u64,
    pub ttl_secs: u64,
}

impl From<StatsCacheSettings> for StatsCacheConfig {
    fn from(s: StatsCacheSettings) -> Self {
        Self {
            capacity: s.capacity,
            ttl_secs: s.ttl_secs,
        }
    }
}

/// Parse an env var, warning and falling back to the default when the value
/// does not parse.
fn env_parse<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("invalid {name} value '{raw}', using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());
        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./linktally.db?mode=rwc".to_string());
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 5u32);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: env_parse("RETRY_MAX_ATTEMPTS", defaults.max_attempts),
            base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", defaults.base_delay_ms),
            max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", defaults.max_delay_ms),
        };

        let stats_cache = env_flag("STATS_CACHE_ENABLED").then(|| StatsCacheSettings {
            capacity: env_parse("STATS_CACHE_CAPACITY", 1000u64),
            ttl_secs: env_parse("STATS_CACHE_TTL_SECS", 60u64),
        });

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url,
                max_connections,
            },
            geoip_db_path: std::env::var("GEOIP_DB_PATH").ok(),
            retry,
            migration_batch_size: env_parse("MIGRATION_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            identity_cache_capacity: env_parse("IDENTITY_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
            stats_cache,
        })
    }
}
