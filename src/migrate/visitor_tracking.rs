//! Retroactive tracking ids for historical visits.
//!
//! Forward, every distinct source address still present in v2 visits gets
//! one minted tracking id (insert-if-absent, so an address that already has
//! a binding keeps it) and all its visits are stamped. Reverse deletes the
//! id assignments and the derived visit field; the visits themselves stay.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Migration, MigrationReport, MigrationStore};

pub struct VisitorTracking;

#[async_trait]
impl Migration for VisitorTracking {
    fn name(&self) -> &'static str {
        "visitor_tracking"
    }

    fn summary(&self) -> &'static str {
        "mint one tracking id per distinct source address and stamp historical visits"
    }

    async fn up(&self, store: &dyn MigrationStore, batch_size: u32) -> Result<MigrationReport> {
        store.create_visitor_table().await?;
        store.add_visit_tracking_column().await?;

        let mut report = MigrationReport {
            transformed: 0,
            skipped: store.visits_at_or_above(3).await?,
        };

        loop {
            let batch = store.backfill_tracking_batch(batch_size).await?;
            if batch.addresses == 0 {
                break;
            }
            report.transformed += batch.visits;
            debug!(
                addresses = batch.addresses,
                visits = batch.visits,
                "backfilled tracking id batch"
            );
        }

        // Rows whose source address was scrubbed before this migration ran
        // have nothing to attribute; they move forward with a NULL id.
        let mut unattributable = 0u64;
        loop {
            let promoted = store.promote_unattributable_batch(batch_size).await?;
            if promoted == 0 {
                break;
            }
            unattributable += promoted;
        }
        if unattributable > 0 {
            report.transformed += unattributable;
            warn!(
                visits = unattributable,
                "visits had no source address; tracking id left NULL"
            );
        }

        Ok(report)
    }

    async fn down(&self, store: &dyn MigrationStore, batch_size: u32) -> Result<MigrationReport> {
        let mut report = MigrationReport {
            transformed: 0,
            skipped: store.visits_at_or_below(2).await?,
        };

        loop {
            let demoted = store.demote_visit_batch(3, 2, batch_size).await?;
            if demoted == 0 {
                break;
            }
            report.transformed += demoted;
        }

        store.drop_visit_tracking_column().await?;
        store.drop_visitor_table().await?;

        Ok(report)
    }
}
