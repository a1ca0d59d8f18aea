//! Migration coordinator tests: legacy-shaped data is seeded through a raw
//! pool, then transformed through the public migration API.

use std::collections::HashSet;
use tempfile::TempDir;

use linktally::migrate::{MigrationStore, Migrator};
use linktally::store::{LinkStore, SqliteStore};

/// Store with only the v1 base schema; no migrations applied.
async fn v1_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let store = SqliteStore::new(&url, 5).await.unwrap();
    store.ensure_base_schema().await.unwrap();
    (dir, store)
}

async fn seed_v1_link(store: &SqliteStore, link_id: &str, alias: Option<&str>, deleted: bool) {
    sqlx::query(
        r#"
        INSERT INTO links (link_id, title, long_url, owner, alias, deleted, created_at, schema_version)
        VALUES (?, 'legacy', 'https://example.com', 'alice', ?, ?, 1000, 1)
        "#,
    )
    .bind(link_id)
    .bind(alias)
    .bind(deleted)
    .execute(store.pool.as_ref())
    .await
    .unwrap();
}

async fn seed_v1_visit(store: &SqliteStore, link_id: &str, source: Option<&str>, visited_at: i64) {
    sqlx::query(
        r#"
        INSERT INTO visits (link_id, source_address, user_agent, referer, visited_at, schema_version)
        VALUES (?, ?, NULL, NULL, ?, 1)
        "#,
    )
    .bind(link_id)
    .bind(source)
    .bind(visited_at)
    .execute(store.pool.as_ref())
    .await
    .unwrap();
}

async fn link_row(store: &SqliteStore, link_id: &str) -> (Option<String>, i64) {
    sqlx::query_as::<_, (Option<String>, i64)>(
        "SELECT alias, schema_version FROM links WHERE link_id = ?",
    )
    .bind(link_id)
    .fetch_one(store.pool.as_ref())
    .await
    .unwrap()
}

async fn column_exists(store: &SqliteStore, table: &str, column: &str) -> bool {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(store.pool.as_ref())
            .await
            .unwrap();
    count > 0
}

async fn table_exists(store: &SqliteStore, table: &str) -> bool {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_one(store.pool.as_ref())
    .await
    .unwrap();
    count > 0
}

#[tokio::test]
async fn multi_alias_collapses_inline_aliases_and_stamps_visits() {
    let (_dir, store) = v1_store().await;
    seed_v1_link(&store, "L1", Some("abc"), false).await;
    seed_v1_link(&store, "L2", Some("xyz"), true).await;
    seed_v1_visit(&store, "L1", Some("10.0.0.1"), 1000).await;
    seed_v1_visit(&store, "L1", Some("10.0.0.2"), 2000).await;
    seed_v1_visit(&store, "L2", Some("10.0.0.1"), 3000).await;

    let migrator = Migrator::registered(2);
    let report = migrator.apply(&store, "multi_alias").await.unwrap();
    assert_eq!(report.transformed, 5, "2 links + 3 visits");
    assert_eq!(report.skipped, 0);

    // The alias row inherits the link's deleted flag.
    let rows = sqlx::query_as::<_, (String, String, bool)>(
        "SELECT link_id, alias_text, deleted FROM aliases ORDER BY link_id",
    )
    .fetch_all(store.pool.as_ref())
    .await
    .unwrap();
    assert_eq!(
        rows,
        vec![
            ("L1".to_string(), "abc".to_string(), false),
            ("L2".to_string(), "xyz".to_string(), true),
        ]
    );

    // Inline column nulled, version bumped.
    assert_eq!(link_row(&store, "L1").await, (None, 2));
    assert_eq!(link_row(&store, "L2").await, (None, 2));

    // Visits carry the alias text in effect at visit time.
    let aliases: Vec<Option<String>> =
        sqlx::query_scalar("SELECT alias FROM visits ORDER BY id")
            .fetch_all(store.pool.as_ref())
            .await
            .unwrap();
    assert_eq!(
        aliases,
        vec![
            Some("abc".to_string()),
            Some("abc".to_string()),
            Some("xyz".to_string()),
        ]
    );
}

#[tokio::test]
async fn multi_alias_is_idempotent() {
    let (_dir, store) = v1_store().await;
    seed_v1_link(&store, "L1", Some("abc"), false).await;
    seed_v1_visit(&store, "L1", Some("10.0.0.1"), 1000).await;

    let migrator = Migrator::registered(100);
    let first = migrator.apply(&store, "multi_alias").await.unwrap();
    assert_eq!(first.transformed, 2);

    let second = migrator.apply(&store, "multi_alias").await.unwrap();
    assert_eq!(second.transformed, 0, "already-migrated rows are skipped");
    assert_eq!(second.skipped, 2);

    let alias_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM aliases")
        .fetch_one(store.pool.as_ref())
        .await
        .unwrap();
    assert_eq!(alias_rows, 1);
}

#[tokio::test]
async fn multi_alias_revert_restores_the_single_alias_shape() {
    let (_dir, store) = v1_store().await;
    seed_v1_link(&store, "L1", Some("abc"), false).await;
    seed_v1_link(&store, "L2", Some("xyz"), true).await;
    seed_v1_visit(&store, "L1", Some("10.0.0.1"), 1000).await;

    let migrator = Migrator::registered(100);
    migrator.apply(&store, "multi_alias").await.unwrap();
    let report = migrator.revert(&store, "multi_alias").await.unwrap();
    assert_eq!(report.transformed, 3);

    assert_eq!(link_row(&store, "L1").await, (Some("abc".to_string()), 1));
    assert_eq!(link_row(&store, "L2").await, (Some("xyz".to_string()), 1));
    assert!(!table_exists(&store, "aliases").await);
    assert!(!column_exists(&store, "visits", "alias").await);
}

#[tokio::test]
async fn visitor_tracking_mints_one_id_per_distinct_address() {
    let (_dir, store) = v1_store().await;
    seed_v1_link(&store, "L1", Some("abc"), false).await;
    seed_v1_visit(&store, "L1", Some("10.0.0.1"), 1000).await;
    seed_v1_visit(&store, "L1", Some("10.0.0.2"), 2000).await;
    seed_v1_visit(&store, "L1", Some("10.0.0.1"), 3000).await;
    // Scrubbed before tracking existed: nothing to attribute.
    seed_v1_visit(&store, "L1", None, 4000).await;

    let migrator = Migrator::registered(1);
    migrator.apply(&store, "multi_alias").await.unwrap();
    let report = migrator.apply(&store, "visitor_tracking").await.unwrap();
    assert_eq!(report.transformed, 4, "3 attributed + 1 unattributable");

    let bindings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visitors")
        .fetch_one(store.pool.as_ref())
        .await
        .unwrap();
    assert_eq!(bindings, 2);

    let rows = sqlx::query_as::<_, (Option<String>, Option<String>)>(
        "SELECT source_address, tracking_id FROM visits ORDER BY id",
    )
    .fetch_all(store.pool.as_ref())
    .await
    .unwrap();

    let distinct: HashSet<_> = rows.iter().filter_map(|(_, t)| t.clone()).collect();
    assert_eq!(distinct.len(), 2);
    assert_eq!(rows[0].1, rows[2].1, "same address, same tracking id");
    assert_ne!(rows[0].1, rows[1].1);
    assert!(rows[3].1.is_none(), "scrubbed visit stays unattributed");
}

#[tokio::test]
async fn visitor_tracking_revert_keeps_visits_and_drops_derivations() {
    let (_dir, store) = v1_store().await;
    seed_v1_link(&store, "L1", Some("abc"), false).await;
    seed_v1_visit(&store, "L1", Some("10.0.0.1"), 1000).await;

    let migrator = Migrator::registered(100);
    migrator.apply(&store, "multi_alias").await.unwrap();
    migrator.apply(&store, "visitor_tracking").await.unwrap();

    migrator.revert(&store, "visitor_tracking").await.unwrap();

    assert!(!table_exists(&store, "visitors").await);
    assert!(!column_exists(&store, "visits", "tracking_id").await);
    let visits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visits")
        .fetch_one(store.pool.as_ref())
        .await
        .unwrap();
    assert_eq!(visits, 1, "reversal never deletes visits");
}

#[tokio::test]
async fn migrations_apply_and_revert_in_registry_order_only() {
    let (_dir, store) = v1_store().await;
    let migrator = Migrator::registered(100);

    // visitor_tracking depends on multi_alias being applied first.
    assert!(migrator.apply(&store, "visitor_tracking").await.is_err());

    migrator.apply(&store, "multi_alias").await.unwrap();
    migrator.apply(&store, "visitor_tracking").await.unwrap();

    // And the earlier one cannot be reverted while the later is applied.
    assert!(migrator.revert(&store, "multi_alias").await.is_err());
    migrator.revert(&store, "visitor_tracking").await.unwrap();
    migrator.revert(&store, "multi_alias").await.unwrap();

    assert!(migrator.apply(&store, "no_such_migration").await.is_err());
}

#[tokio::test]
async fn status_tracks_the_applied_set() {
    let (_dir, store) = v1_store().await;
    let migrator = Migrator::registered(100);

    let before = migrator.status(&store).await.unwrap();
    assert_eq!(before.len(), 2);
    assert!(before.iter().all(|s| !s.applied));

    migrator.apply(&store, "multi_alias").await.unwrap();

    let after = migrator.status(&store).await.unwrap();
    assert!(after.iter().find(|s| s.name == "multi_alias").unwrap().applied);
    assert!(!after.iter().find(|s| s.name == "visitor_tracking").unwrap().applied);
}

#[tokio::test]
async fn init_brings_a_legacy_database_to_the_current_schema() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());

    {
        let store = SqliteStore::new(&url, 5).await.unwrap();
        store.ensure_base_schema().await.unwrap();
        seed_v1_link(&store, "L1", Some("abc"), false).await;
        seed_v1_visit(&store, "L1", Some("10.0.0.1"), 1000).await;
    }

    let store = SqliteStore::new(&url, 5).await.unwrap();
    store.init().await.unwrap();

    // The legacy link is addressable through the migrated alias table.
    assert_eq!(store.resolve("abc").await.unwrap(), "L1");
    let visits = store.visits_for_link("L1").await.unwrap();
    assert_eq!(visits[0].alias.as_deref(), Some("abc"));
    assert!(visits[0].tracking_id.is_some());

    // init is idempotent.
    store.init().await.unwrap();
}
