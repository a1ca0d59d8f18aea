use anyhow::Result;
use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::{Link, LinkWithAliases, NewVisit, Visit};

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Bring the database to the current schema: base tables, migration
    /// registry, then every registered migration not yet applied.
    async fn init(&self) -> Result<()>;

    /// Create a link with no aliases yet. Validates the destination URL.
    async fn create_link(&self, title: &str, long_url: &str, owner: &str) -> CoreResult<Link>;

    /// Bind an alias text to a link. `AliasConflict` if the text is live
    /// anywhere, `AliasLimitExceeded` past the live-alias cap. Re-adding a
    /// text this link previously deleted revives the original row.
    async fn add_alias(&self, link_id: &str, alias_text: &str) -> CoreResult<()>;

    /// Mark an alias deleted. No-op when the alias is absent or already
    /// deleted.
    async fn remove_alias(&self, link_id: &str, alias_text: &str) -> CoreResult<()>;

    /// Resolve a live alias to its link id.
    async fn resolve(&self, alias_text: &str) -> CoreResult<String>;

    /// Fetch a link with its ordered alias list.
    async fn get_link(&self, link_id: &str) -> CoreResult<LinkWithAliases>;

    /// Soft-delete a link. Idempotent; aliases keep their own deleted flags.
    async fn delete_link(&self, link_id: &str) -> CoreResult<()>;

    /// Read an existing tracking id binding, if any.
    async fn tracking_id_for(&self, source_address: &str) -> CoreResult<Option<String>>;

    /// Insert-if-absent binding of `candidate` to the address, then read back
    /// whichever id won. All concurrent callers converge on one id.
    async fn bind_tracking_id(&self, source_address: &str, candidate: &str) -> CoreResult<String>;

    /// Append one visit row, durable before return. Returns the visit id.
    async fn append_visit(&self, visit: &NewVisit) -> CoreResult<i64>;

    /// Full visit history of a link ordered by `(visited_at, id)` ascending.
    async fn visits_for_link(&self, link_id: &str) -> CoreResult<Vec<Visit>>;

    /// Blank `source_address` on visits older than the cutoff. Tracking id
    /// bindings are left untouched.
    async fn scrub_sources(&self, older_than: i64) -> CoreResult<u64>;
}

/// Store-level uniqueness violation, any backend. Used to map constraint
/// failures on the live-alias index to `AliasConflict`.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            // SQLite 2067 = constraint_unique, 1555 = constraint_primarykey;
            // Postgres 23505 = unique_violation.
            return matches!(code.as_ref(), "2067" | "1555" | "23505");
        }
    }
    false
}
