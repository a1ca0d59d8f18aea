//! Visit recorder and identity resolver integration tests.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

use linktally::error::CoreError;
use linktally::geo::{GeoProvider, StaticGeo};
use linktally::identity::IdentityResolver;
use linktally::models::GeoMark;
use linktally::recorder::VisitRecorder;
use linktally::retry::RetryPolicy;
use linktally::store::{LinkStore, SqliteStore};

const CHROME_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

async fn sqlite_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let store = SqliteStore::new(&url, 5).await.unwrap();
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

fn recorder_with_geo(store: Arc<SqliteStore>, geo: Arc<dyn GeoProvider>) -> VisitRecorder {
    let store: Arc<dyn LinkStore> = store;
    let identity = Arc::new(IdentityResolver::new(Arc::clone(&store), 1000));
    VisitRecorder::new(store, identity, geo, RetryPolicy::default())
}

#[tokio::test]
async fn record_appends_a_fully_populated_visit() {
    let (_dir, store) = sqlite_store().await;
    let link = store
        .create_link("docs", "https://example.com/docs", "alice")
        .await
        .unwrap();
    store.add_alias(&link.link_id, "docs").await.unwrap();

    let mut table = HashMap::new();
    table.insert(
        "203.0.113.7".to_string(),
        GeoMark {
            country_code: Some("DE".to_string()),
            region_code: Some("BE".to_string()),
        },
    );
    let recorder = recorder_with_geo(Arc::clone(&store), Arc::new(StaticGeo::new(table)));

    let visit_id = recorder
        .record(
            "docs",
            "203.0.113.7",
            Some(CHROME_WIN),
            Some("https://news.ycombinator.com/"),
            1_767_268_800,
        )
        .await
        .unwrap();
    assert!(visit_id > 0);

    let visits = store.visits_for_link(&link.link_id).await.unwrap();
    assert_eq!(visits.len(), 1);
    let visit = &visits[0];
    assert_eq!(visit.alias.as_deref(), Some("docs"));
    assert_eq!(visit.source_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(visit.country_code.as_deref(), Some("DE"));
    assert_eq!(visit.region_code.as_deref(), Some("BE"));
    assert!(visit.tracking_id.is_some());
    assert_eq!(visit.visited_at, 1_767_268_800);
}

#[tokio::test]
async fn unresolvable_alias_is_not_found() {
    let (_dir, store) = sqlite_store().await;
    let recorder = recorder_with_geo(Arc::clone(&store), Arc::new(StaticGeo::empty()));

    let err = recorder
        .record("nope", "10.0.0.1", None, None, 1_767_268_800)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound));

    // Deleted aliases no longer resolve either.
    let link = store
        .create_link("a", "https://example.com", "alice")
        .await
        .unwrap();
    store.add_alias(&link.link_id, "gone").await.unwrap();
    store.remove_alias(&link.link_id, "gone").await.unwrap();

    let err = recorder
        .record("gone", "10.0.0.1", None, None, 1_767_268_800)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound));
}

#[tokio::test]
async fn unknown_geo_never_fails_the_record() {
    let (_dir, store) = sqlite_store().await;
    let link = store
        .create_link("a", "https://example.com", "alice")
        .await
        .unwrap();
    store.add_alias(&link.link_id, "abc").await.unwrap();

    let recorder = recorder_with_geo(Arc::clone(&store), Arc::new(StaticGeo::empty()));
    recorder
        .record("abc", "not-an-ip", None, None, 1_767_268_800)
        .await
        .unwrap();

    let visits = store.visits_for_link(&link.link_id).await.unwrap();
    assert!(visits[0].country_code.is_none());
    assert!(visits[0].region_code.is_none());
}

#[tokio::test]
async fn same_source_always_gets_the_same_tracking_id() {
    let (_dir, store) = sqlite_store().await;
    let link = store
        .create_link("a", "https://example.com", "alice")
        .await
        .unwrap();
    store.add_alias(&link.link_id, "abc").await.unwrap();

    let recorder = recorder_with_geo(Arc::clone(&store), Arc::new(StaticGeo::empty()));
    for i in 0..3 {
        recorder
            .record("abc", "10.0.0.9", None, None, 1_767_268_800 + i)
            .await
            .unwrap();
    }

    let visits = store.visits_for_link(&link.link_id).await.unwrap();
    let ids: HashSet<_> = visits.iter().map(|v| v.tracking_id.clone().unwrap()).collect();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn concurrent_first_sightings_converge_on_one_id() {
    let (_dir, store) = sqlite_store().await;
    let store: Arc<dyn LinkStore> = store;
    let identity = Arc::new(IdentityResolver::new(Arc::clone(&store), 1000));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let identity = Arc::clone(&identity);
        handles.push(tokio::spawn(async move {
            identity.identity_for("198.51.100.23").await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap());
    }
    assert_eq!(ids.len(), 1, "all concurrent callers see the same id");

    // The binding survives for later callers too.
    let again = identity.identity_for("198.51.100.23").await.unwrap();
    assert!(ids.contains(&again));
}

#[tokio::test]
async fn scrub_blanks_addresses_but_keeps_tracking_ids() {
    let (_dir, store) = sqlite_store().await;
    let link = store
        .create_link("a", "https://example.com", "alice")
        .await
        .unwrap();
    store.add_alias(&link.link_id, "abc").await.unwrap();

    let recorder = recorder_with_geo(Arc::clone(&store), Arc::new(StaticGeo::empty()));
    recorder.record("abc", "10.0.0.1", None, None, 1000).await.unwrap();
    recorder.record("abc", "10.0.0.2", None, None, 5000).await.unwrap();

    let scrubbed = store.scrub_sources(2000).await.unwrap();
    assert_eq!(scrubbed, 1);

    let visits = store.visits_for_link(&link.link_id).await.unwrap();
    assert!(visits[0].source_address.is_none());
    assert!(visits[0].tracking_id.is_some(), "tracking id survives the scrub");
    assert_eq!(visits[1].source_address.as_deref(), Some("10.0.0.2"));

    // The identity binding itself is permanent: a returning visitor from the
    // scrubbed address still maps to the old id.
    let old_id = visits[0].tracking_id.clone().unwrap();
    assert_eq!(
        store.bind_tracking_id("10.0.0.1", "new-candidate").await.unwrap(),
        old_id
    );

    // Re-running the scrub finds nothing new.
    assert_eq!(store.scrub_sources(2000).await.unwrap(), 0);
}
