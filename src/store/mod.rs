pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;
pub use trait_def::{is_unique_violation, LinkStore};

/// Seconds since the Unix epoch.
pub fn unix_now() -> anyhow::Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64)
}
