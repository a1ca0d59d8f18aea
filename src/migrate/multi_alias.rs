//! Collapse the legacy single-alias column into the multi-alias table.
//!
//! v1 links carry their sole alias inline in `links.alias`. Forward, each
//! link gets one row in the `aliases` table tagged with the link's own
//! deleted flag, the inline column is nulled, and every historical visit is
//! stamped with the alias text that was in effect. Reverse puts the
//! position-0 alias text back into the inline column and discards the
//! derived visit field.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{Migration, MigrationReport, MigrationStore};

pub struct MultiAlias;

#[async_trait]
impl Migration for MultiAlias {
    fn name(&self) -> &'static str {
        "multi_alias"
    }

    fn summary(&self) -> &'static str {
        "move the inline link alias into the alias table and stamp visits with alias text"
    }

    async fn up(&self, store: &dyn MigrationStore, batch_size: u32) -> Result<MigrationReport> {
        store.create_alias_schema().await?;
        store.add_visit_alias_column().await?;

        let mut report = MigrationReport {
            transformed: 0,
            skipped: store.links_at_or_above(2).await? + store.visits_at_or_above(2).await?,
        };

        loop {
            let moved = store.collapse_link_batch(batch_size).await?;
            if moved == 0 {
                break;
            }
            report.transformed += moved;
            debug!(links = moved, "collapsed link alias batch");
        }

        loop {
            let stamped = store.fill_visit_alias_batch(batch_size).await?;
            if stamped == 0 {
                break;
            }
            report.transformed += stamped;
            debug!(visits = stamped, "stamped visit alias batch");
        }

        Ok(report)
    }

    async fn down(&self, store: &dyn MigrationStore, batch_size: u32) -> Result<MigrationReport> {
        let mut report = MigrationReport {
            transformed: 0,
            skipped: store.links_at_or_below(1).await? + store.visits_at_or_below(1).await?,
        };

        // Links first: restoring the inline column reads the alias table,
        // which is dropped at the end.
        loop {
            let restored = store.restore_link_batch(batch_size).await?;
            if restored == 0 {
                break;
            }
            report.transformed += restored;
            debug!(links = restored, "restored inline alias batch");
        }

        loop {
            let demoted = store.demote_visit_batch(2, 1, batch_size).await?;
            if demoted == 0 {
                break;
            }
            report.transformed += demoted;
        }

        store.drop_visit_alias_column().await?;
        store.drop_alias_schema().await?;

        Ok(report)
    }
}
