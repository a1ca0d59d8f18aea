use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::migrate::{
    BackfillBatch, MigrationStore, Migrator, DEFAULT_BATCH_SIZE, LINK_SCHEMA_CURRENT,
    VISIT_SCHEMA_CURRENT,
};
use crate::models::link::MAX_LIVE_ALIASES;
use crate::models::{Alias, Link, LinkWithAliases, NewVisit, Visit};
use crate::store::{is_unique_violation, unix_now, LinkStore};
use crate::validate::{validate_alias_text, validate_long_url};

pub struct PgStore {
    pub pool: Arc<PgPool>,
}

impl PgStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

}

#[async_trait]
impl LinkStore for PgStore {
    async fn init(&self) -> Result<()> {
        self.ensure_base_schema().await?;
        Migrator::registered(DEFAULT_BATCH_SIZE).up(self).await?;
        Ok(())
    }

    async fn create_link(&self, title: &str, long_url: &str, owner: &str) -> CoreResult<Link> {
        validate_long_url(long_url)?;

        let link = Link {
            link_id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            long_url: long_url.trim().to_string(),
            owner: owner.to_string(),
            deleted: false,
            created_at: unix_now()?,
        };

        sqlx::query(
            r#"
            INSERT INTO links (link_id, title, long_url, owner, alias, deleted, created_at, schema_version)
            VALUES ($1, $2, $3, $4, NULL, FALSE, $5, $6)
            "#,
        )
        .bind(&link.link_id)
        .bind(&link.title)
        .bind(&link.long_url)
        .bind(&link.owner)
        .bind(link.created_at)
        .bind(LINK_SCHEMA_CURRENT)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        Ok(link)
    }

    async fn add_alias(&self, link_id: &str, alias_text: &str) -> CoreResult<()> {
        validate_alias_text(alias_text)?;

        // The whole check-then-write runs under a lock on the link row, so
        // concurrent adders to one link serialize and the live-alias cap
        // cannot be overshot between the count and the insert. A dropped
        // transaction rolls back.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Other(e.into()))?;

        let locked = sqlx::query_scalar::<_, String>(
            "SELECT link_id FROM links WHERE link_id = $1 FOR UPDATE",
        )
        .bind(link_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CoreError::Other(e.into()))?;
        if locked.is_none() {
            return Err(CoreError::NotFound);
        }

        let live = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM aliases WHERE link_id = $1 AND deleted = FALSE",
        )
        .bind(link_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoreError::Other(e.into()))?;
        if live >= MAX_LIVE_ALIASES {
            return Err(CoreError::AliasLimitExceeded);
        }

        // Revive a row this link deleted earlier. The partial unique index on
        // live alias texts rejects the update when the text is live elsewhere.
        let revived = sqlx::query(
            "UPDATE aliases SET deleted = FALSE WHERE link_id = $1 AND alias_text = $2 AND deleted = TRUE",
        )
        .bind(link_id)
        .bind(alias_text)
        .execute(&mut *tx)
        .await;

        match revived {
            Ok(result) if result.rows_affected() > 0 => {
                tx.commit().await.map_err(|e| CoreError::Other(e.into()))?;
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(CoreError::AliasConflict),
            Err(e) => return Err(CoreError::Other(e.into())),
        }

        let position = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM aliases WHERE link_id = $1",
        )
        .bind(link_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        // Adders of the same text on different links race here; the
        // constraint picks exactly one winner and the rest see zero rows.
        let result = sqlx::query(
            r#"
            INSERT INTO aliases (link_id, alias_text, deleted, position)
            VALUES ($1, $2, FALSE, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(link_id)
        .bind(alias_text)
        .bind(position)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::AliasConflict);
        }

        tx.commit().await.map_err(|e| CoreError::Other(e.into()))?;
        Ok(())
    }

    async fn remove_alias(&self, link_id: &str, alias_text: &str) -> CoreResult<()> {
        sqlx::query(
            "UPDATE aliases SET deleted = TRUE WHERE link_id = $1 AND alias_text = $2 AND deleted = FALSE",
        )
        .bind(link_id)
        .bind(alias_text)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        Ok(())
    }

    async fn resolve(&self, alias_text: &str) -> CoreResult<String> {
        let link_id = sqlx::query_scalar::<_, String>(
            "SELECT link_id FROM aliases WHERE alias_text = $1 AND deleted = FALSE",
        )
        .bind(alias_text)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        link_id.ok_or(CoreError::NotFound)
    }

    async fn get_link(&self, link_id: &str) -> CoreResult<LinkWithAliases> {
        let link = sqlx::query_as::<_, Link>(
            r#"
            SELECT link_id, title, long_url, owner, deleted, created_at
            FROM links
            WHERE link_id = $1
            "#,
        )
        .bind(link_id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?
        .ok_or(CoreError::NotFound)?;

        let aliases = sqlx::query_as::<_, Alias>(
            r#"
            SELECT alias_text, deleted, position
            FROM aliases
            WHERE link_id = $1
            ORDER BY position, alias_text
            "#,
        )
        .bind(link_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        Ok(LinkWithAliases { link, aliases })
    }

    async fn delete_link(&self, link_id: &str) -> CoreResult<()> {
        let result = sqlx::query("UPDATE links SET deleted = TRUE WHERE link_id = $1")
            .bind(link_id)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| CoreError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound);
        }

        Ok(())
    }

    async fn tracking_id_for(&self, source_address: &str) -> CoreResult<Option<String>> {
        let id = sqlx::query_scalar::<_, String>(
            "SELECT tracking_id FROM visitors WHERE source_address = $1",
        )
        .bind(source_address)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        Ok(id)
    }

    async fn bind_tracking_id(&self, source_address: &str, candidate: &str) -> CoreResult<String> {
        sqlx::query(
            r#"
            INSERT INTO visitors (source_address, tracking_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_address) DO NOTHING
            "#,
        )
        .bind(source_address)
        .bind(candidate)
        .bind(unix_now()?)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        let id = sqlx::query_scalar::<_, String>(
            "SELECT tracking_id FROM visitors WHERE source_address = $1",
        )
        .bind(source_address)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        Ok(id)
    }

    async fn append_visit(&self, visit: &NewVisit) -> CoreResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO visits (link_id, alias, tracking_id, source_address, user_agent,
                                referer, country_code, region_code, visited_at, schema_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&visit.link_id)
        .bind(&visit.alias)
        .bind(&visit.tracking_id)
        .bind(&visit.source_address)
        .bind(&visit.user_agent)
        .bind(&visit.referer)
        .bind(&visit.geo.country_code)
        .bind(&visit.geo.region_code)
        .bind(visit.visited_at)
        .bind(VISIT_SCHEMA_CURRENT)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        Ok(id)
    }

    async fn visits_for_link(&self, link_id: &str) -> CoreResult<Vec<Visit>> {
        let visits = sqlx::query_as::<_, Visit>(
            r#"
            SELECT id, link_id, alias, tracking_id, source_address, user_agent,
                   referer, country_code, region_code, visited_at, schema_version
            FROM visits
            WHERE link_id = $1
            ORDER BY visited_at ASC, id ASC
            "#,
        )
        .bind(link_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        Ok(visits)
    }

    async fn scrub_sources(&self, older_than: i64) -> CoreResult<u64> {
        let result = sqlx::query(
            "UPDATE visits SET source_address = NULL WHERE visited_at < $1 AND source_address IS NOT NULL",
        )
        .bind(older_than)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| CoreError::Other(e.into()))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn ensure_base_schema(&self) -> Result<()> {
        // v1 shape: one inline alias per link, visits without alias text or
        // tracking id. Later columns arrive through registered migrations.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                link_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                long_url TEXT NOT NULL,
                owner TEXT NOT NULL,
                alias TEXT,
                deleted BOOLEAN NOT NULL DEFAULT FALSE,
                created_at BIGINT NOT NULL,
                schema_version BIGINT NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                id BIGSERIAL PRIMARY KEY,
                link_id TEXT NOT NULL,
                source_address TEXT,
                user_agent TEXT,
                referer TEXT,
                country_code TEXT,
                region_code TEXT,
                visited_at BIGINT NOT NULL,
                schema_version BIGINT NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visits_link ON visits(link_id, visited_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn applied_migrations(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM schema_migrations ORDER BY applied_at, name",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(names)
    }

    async fn mark_applied(&self, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schema_migrations (name, applied_at)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(unix_now()?)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn mark_reverted(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM schema_migrations WHERE name = $1")
            .bind(name)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn links_at_or_above(&self, version: i64) -> Result<u64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM links WHERE schema_version >= $1")
                .bind(version)
                .fetch_one(self.pool.as_ref())
                .await?;
        Ok(count as u64)
    }

    async fn links_at_or_below(&self, version: i64) -> Result<u64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM links WHERE schema_version <= $1")
                .bind(version)
                .fetch_one(self.pool.as_ref())
                .await?;
        Ok(count as u64)
    }

    async fn visits_at_or_above(&self, version: i64) -> Result<u64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM visits WHERE schema_version >= $1")
                .bind(version)
                .fetch_one(self.pool.as_ref())
                .await?;
        Ok(count as u64)
    }

    async fn visits_at_or_below(&self, version: i64) -> Result<u64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM visits WHERE schema_version <= $1")
                .bind(version)
                .fetch_one(self.pool.as_ref())
                .await?;
        Ok(count as u64)
    }

    async fn create_alias_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aliases (
                link_id TEXT NOT NULL,
                alias_text TEXT NOT NULL,
                deleted BOOLEAN NOT NULL DEFAULT FALSE,
                position BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (link_id, alias_text)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // At most one live row per text, system-wide.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_aliases_live_text ON aliases(alias_text) WHERE deleted = FALSE",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn add_visit_alias_column(&self) -> Result<()> {
        sqlx::query("ALTER TABLE visits ADD COLUMN IF NOT EXISTS alias TEXT")
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn collapse_link_batch(&self, limit: u32) -> Result<u64> {
        let rows = sqlx::query_as::<_, (String, Option<String>, bool)>(
            "SELECT link_id, alias, deleted FROM links WHERE schema_version < 2 LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await?;

        let mut moved = 0u64;
        for (link_id, alias, deleted) in rows {
            let mut tx = self.pool.begin().await?;

            match alias {
                Some(text) => {
                    let inserted = sqlx::query(
                        r#"
                        INSERT INTO aliases (link_id, alias_text, deleted, position)
                        VALUES ($1, $2, $3, 0)
                        ON CONFLICT DO NOTHING
                        "#,
                    )
                    .bind(&link_id)
                    .bind(&text)
                    .bind(deleted)
                    .execute(&mut *tx)
                    .await?;

                    if inserted.rows_affected() == 0 {
                        warn!(link_id, alias = text, "alias row already present, keeping it");
                    }
                }
                None => warn!(link_id, "v1 link without alias text"),
            }

            sqlx::query("UPDATE links SET alias = NULL, schema_version = 2 WHERE link_id = $1")
                .bind(&link_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            moved += 1;
        }

        Ok(moved)
    }

    async fn fill_visit_alias_batch(&self, limit: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE visits SET
                alias = (SELECT a.alias_text FROM aliases a
                         WHERE a.link_id = visits.link_id
                         ORDER BY a.position, a.alias_text LIMIT 1),
                schema_version = 2
            WHERE id IN (SELECT id FROM visits WHERE schema_version < 2 LIMIT $1)
            "#,
        )
        .bind(limit as i64)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn restore_link_batch(&self, limit: u32) -> Result<u64> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT link_id FROM links WHERE schema_version >= 2 LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await?;

        let mut restored = 0u64;
        for link_id in ids {
            let mut tx = self.pool.begin().await?;

            let original = sqlx::query_scalar::<_, String>(
                r#"
                SELECT alias_text FROM aliases
                WHERE link_id = $1
                ORDER BY position, alias_text LIMIT 1
                "#,
            )
            .bind(&link_id)
            .fetch_optional(&mut *tx)
            .await?;

            sqlx::query("UPDATE links SET alias = $1, schema_version = 1 WHERE link_id = $2")
                .bind(&original)
                .bind(&link_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            restored += 1;
        }

        Ok(restored)
    }

    async fn drop_alias_schema(&self) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS aliases")
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn drop_visit_alias_column(&self) -> Result<()> {
        sqlx::query("ALTER TABLE visits DROP COLUMN IF EXISTS alias")
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn create_visitor_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visitors (
                source_address TEXT PRIMARY KEY,
                tracking_id TEXT NOT NULL UNIQUE,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn add_visit_tracking_column(&self) -> Result<()> {
        sqlx::query("ALTER TABLE visits ADD COLUMN IF NOT EXISTS tracking_id TEXT")
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn backfill_tracking_batch(&self, limit: u32) -> Result<BackfillBatch> {
        let addresses = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT source_address FROM visits
            WHERE schema_version < 3 AND source_address IS NOT NULL
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await?;

        let mut batch = BackfillBatch::default();
        for address in addresses {
            let candidate = Uuid::new_v4().to_string();
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO visitors (source_address, tracking_id, created_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (source_address) DO NOTHING
                "#,
            )
            .bind(&address)
            .bind(&candidate)
            .bind(unix_now()?)
            .execute(&mut *tx)
            .await?;

            let tracking_id = sqlx::query_scalar::<_, String>(
                "SELECT tracking_id FROM visitors WHERE source_address = $1",
            )
            .bind(&address)
            .fetch_one(&mut *tx)
            .await?;

            let stamped = sqlx::query(
                r#"
                UPDATE visits SET tracking_id = $1, schema_version = 3
                WHERE source_address = $2 AND schema_version < 3
                "#,
            )
            .bind(&tracking_id)
            .bind(&address)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            batch.addresses += 1;
            batch.visits += stamped.rows_affected();
        }

        Ok(batch)
    }

    async fn promote_unattributable_batch(&self, limit: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE visits SET schema_version = 3
            WHERE id IN (SELECT id FROM visits
                         WHERE schema_version < 3 AND source_address IS NULL
                         LIMIT $1)
            "#,
        )
        .bind(limit as i64)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn drop_visitor_table(&self) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS visitors")
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn drop_visit_tracking_column(&self) -> Result<()> {
        sqlx::query("ALTER TABLE visits DROP COLUMN IF EXISTS tracking_id")
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn demote_visit_batch(&self, from: i64, to: i64, limit: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE visits SET schema_version = $1
            WHERE id IN (SELECT id FROM visits WHERE schema_version = $2 LIMIT $3)
            "#,
        )
        .bind(to)
        .bind(from)
        .bind(limit as i64)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }
}
