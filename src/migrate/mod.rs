//! Versioned, idempotent schema migrations.
//!
//! Every migration is registered here in order and applied through the
//! [`Migrator`]. Per-row `schema_version` columns make each transform
//! re-runnable: rows already at the target revision are skipped, so an
//! interrupted run picks up where it stopped. Migrations assume exclusive
//! access to the database (maintenance window); they are never run next to
//! live recording traffic.

pub mod multi_alias;
pub mod visitor_tracking;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::{CoreError, CoreResult};

pub use multi_alias::MultiAlias;
pub use visitor_tracking::VisitorTracking;

/// Schema revision stamped on link rows written by live code.
pub const LINK_SCHEMA_CURRENT: i64 = 2;
/// Schema revision stamped on visit rows written by live code.
pub const VISIT_SCHEMA_CURRENT: i64 = 3;

pub const DEFAULT_BATCH_SIZE: u32 = 500;

/// Outcome of one distinct-address backfill batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackfillBatch {
    pub addresses: u64,
    pub visits: u64,
}

/// Backend surface the migrations run against. Each store backend owns the
/// SQL; the migrations own batching, ordering and accounting.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Create the v1 tables and the migration registry if absent.
    async fn ensure_base_schema(&self) -> Result<()>;
    async fn applied_migrations(&self) -> Result<Vec<String>>;
    async fn mark_applied(&self, name: &str) -> Result<()>;
    async fn mark_reverted(&self, name: &str) -> Result<()>;

    async fn links_at_or_above(&self, version: i64) -> Result<u64>;
    async fn links_at_or_below(&self, version: i64) -> Result<u64>;
    async fn visits_at_or_above(&self, version: i64) -> Result<u64>;
    async fn visits_at_or_below(&self, version: i64) -> Result<u64>;

    // multi_alias
    async fn create_alias_schema(&self) -> Result<()>;
    async fn add_visit_alias_column(&self) -> Result<()>;
    /// Move up to `limit` v1 links into the alias table (one alias row tagged
    /// with the link's deleted flag, legacy column nulled, version bumped).
    /// Each link commits alone. Returns links processed; 0 means done.
    async fn collapse_link_batch(&self, limit: u32) -> Result<u64>;
    /// Stamp up to `limit` v1 visits with their link's original alias text.
    async fn fill_visit_alias_batch(&self, limit: u32) -> Result<u64>;
    /// Copy the position-0 alias text back into the legacy column for up to
    /// `limit` v2 links and demote them to v1. Each link commits alone.
    async fn restore_link_batch(&self, limit: u32) -> Result<u64>;
    async fn drop_alias_schema(&self) -> Result<()>;
    async fn drop_visit_alias_column(&self) -> Result<()>;

    // visitor_tracking
    async fn create_visitor_table(&self) -> Result<()>;
    async fn add_visit_tracking_column(&self) -> Result<()>;
    /// Mint-or-reuse a tracking id for up to `limit` distinct source
    /// addresses still at v2 and stamp all their visits to v3.
    async fn backfill_tracking_batch(&self, limit: u32) -> Result<BackfillBatch>;
    /// Promote v2 visits with no source address left to v3 (tracking id stays
    /// NULL; nothing to attribute them to).
    async fn promote_unattributable_batch(&self, limit: u32) -> Result<u64>;
    async fn drop_visitor_table(&self) -> Result<()>;
    async fn drop_visit_tracking_column(&self) -> Result<()>;

    /// Demote up to `limit` visit rows from one schema version to another.
    async fn demote_visit_batch(&self, from: i64, to: i64, limit: u32) -> Result<u64>;
}

/// Documents transformed by a run, and documents skipped because they were
/// already at the target revision when the run started.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub transformed: u64,
    pub skipped: u64,
}

impl MigrationReport {
    pub fn absorb(&mut self, other: MigrationReport) {
        self.transformed += other.transformed;
        self.skipped += other.skipped;
    }
}

#[async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &'static str;
    fn summary(&self) -> &'static str;
    async fn up(&self, store: &dyn MigrationStore, batch_size: u32) -> Result<MigrationReport>;
    async fn down(&self, store: &dyn MigrationStore, batch_size: u32) -> Result<MigrationReport>;
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub summary: String,
    pub applied: bool,
}

/// Ordered migration registry. Applying or reverting out of order is refused;
/// the transforms themselves are idempotent, so re-applying is always safe.
pub struct Migrator {
    migrations: Vec<Box<dyn Migration>>,
    batch_size: u32,
}

impl Migrator {
    pub fn registered(batch_size: u32) -> Self {
        Self {
            migrations: vec![Box::new(MultiAlias), Box::new(VisitorTracking)],
            batch_size,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.migrations.iter().position(|m| m.name() == name)
    }

    pub async fn status(&self, store: &dyn MigrationStore) -> Result<Vec<MigrationStatus>> {
        let applied = store.applied_migrations().await?;
        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                name: m.name().to_string(),
                summary: m.summary().to_string(),
                applied: applied.iter().any(|n| n == m.name()),
            })
            .collect())
    }

    pub async fn apply(&self, store: &dyn MigrationStore, name: &str) -> CoreResult<MigrationReport> {
        let idx = self.position(name).ok_or(CoreError::NotFound)?;
        let applied = store.applied_migrations().await?;

        for earlier in &self.migrations[..idx] {
            if !applied.iter().any(|n| n == earlier.name()) {
                return Err(CoreError::validation(format!(
                    "cannot apply '{name}' before '{}'",
                    earlier.name()
                )));
            }
        }

        info!(migration = name, "applying migration");
        let report = self.migrations[idx].up(store, self.batch_size).await?;
        store.mark_applied(name).await?;
        info!(
            migration = name,
            transformed = report.transformed,
            skipped = report.skipped,
            "migration applied"
        );
        Ok(report)
    }

    pub async fn revert(&self, store: &dyn MigrationStore, name: &str) -> CoreResult<MigrationReport> {
        let idx = self.position(name).ok_or(CoreError::NotFound)?;
        let applied = store.applied_migrations().await?;

        for later in &self.migrations[idx + 1..] {
            if applied.iter().any(|n| n == later.name()) {
                return Err(CoreError::validation(format!(
                    "cannot revert '{name}' while '{}' is applied",
                    later.name()
                )));
            }
        }

        info!(migration = name, "reverting migration");
        let report = self.migrations[idx].down(store, self.batch_size).await?;
        store.mark_reverted(name).await?;
        info!(
            migration = name,
            transformed = report.transformed,
            skipped = report.skipped,
            "migration reverted"
        );
        Ok(report)
    }

    /// Apply every migration the registry knows and the store has not
    /// recorded yet, in order.
    pub async fn up(
        &self,
        store: &dyn MigrationStore,
    ) -> Result<Vec<(&'static str, MigrationReport)>> {
        let applied = store.applied_migrations().await?;
        let mut reports = Vec::new();

        for migration in &self.migrations {
            if applied.iter().any(|n| n == migration.name()) {
                continue;
            }
            info!(migration = migration.name(), "applying pending migration");
            let report = migration.up(store, self.batch_size).await?;
            store.mark_applied(migration.name()).await?;
            reports.push((migration.name(), report));
        }

        Ok(reports)
    }
}
