//! ConnectionStore interface tests.
//!
//! These tests verify the contract of the ConnectionStore trait.
//! Each storage implementation should run these tests.

use mov::model::{ComponentId, Connection, ConnectionId, Endpoint};
use mov::storage::{ConnectionQuery, ConnectionStore, Upserted};

pub fn endpoint(component: &str, channel: &str) -> Endpoint {
    Endpoint::new(ComponentId::from(component), channel)
}

/// Create an enabled connection between two named endpoints.
pub fn make_connection(source: &str, target: &str) -> Connection {
    Connection::new(
        endpoint(source, "out"),
        endpoint(target, "in"),
        true,
        1_000,
    )
}

async fn upsert_new<S: ConnectionStore>(store: &S, connection: Connection) -> Connection {
    match store.upsert(connection).await.expect("upsert should succeed") {
        Upserted::Created(connection) => connection,
        Upserted::Existing(existing) => panic!("unexpected existing connection {}", existing.id),
    }
}

// =============================================================================
// upsert / get
// =============================================================================

pub async fn test_upsert_and_get<S: ConnectionStore>(store: &S) {
    let mut connection = make_connection("a", "b");
    connection
        .c2_subscriptions
        .insert(endpoint("watcher", "watch"));
    let created = upsert_new(store, connection.clone()).await;
    assert_eq!(created, connection);

    let loaded = store
        .get(&connection.id)
        .await
        .expect("get should succeed")
        .expect("connection should exist");
    assert_eq!(loaded, connection, "connection should round-trip intact");
}

pub async fn test_upsert_same_pair_returns_existing<S: ConnectionStore>(store: &S) {
    let first = upsert_new(store, make_connection("a", "b")).await;

    let second = store
        .upsert(make_connection("a", "b"))
        .await
        .expect("upsert should succeed");
    assert!(!second.is_created());
    assert_eq!(second.connection().id, first.id);

    // The reverse direction is a different pair.
    upsert_new(store, make_connection("b", "a")).await;
}

pub async fn test_soft_delete_frees_pair<S: ConnectionStore>(store: &S) {
    let first = upsert_new(store, make_connection("a", "b")).await;

    let deleted = store
        .soft_delete(&first.id, 2_000)
        .await
        .expect("soft_delete should succeed")
        .expect("first delete should win");
    assert_eq!(deleted.deleted_timestamp, Some(2_000));
    assert!(!deleted.enabled);
    assert!(store.soft_delete(&first.id, 3_000).await.unwrap().is_none());

    let replacement = upsert_new(store, make_connection("a", "b")).await;
    assert_ne!(replacement.id, first.id);

    let old = store.get(&first.id).await.unwrap().unwrap();
    assert_eq!(old.deleted_timestamp, Some(2_000));
}

// =============================================================================
// state changes
// =============================================================================

pub async fn test_set_enabled_live_only<S: ConnectionStore>(store: &S) {
    let connection = upsert_new(store, make_connection("a", "b")).await;

    let disabled = store
        .set_enabled(&connection.id, false, 1_500)
        .await
        .expect("set_enabled should succeed")
        .expect("live connection should change");
    assert!(!disabled.enabled);
    assert_eq!(disabled.update_timestamp, 1_500);

    store.soft_delete(&connection.id, 2_000).await.unwrap();
    assert!(store
        .set_enabled(&connection.id, true, 2_500)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .set_enabled(&ConnectionId::from("missing"), true, 2_500)
        .await
        .unwrap()
        .is_none());
}

pub async fn test_subscriptions<S: ConnectionStore>(store: &S) {
    let first = upsert_new(store, make_connection("a", "b")).await;
    let second = upsert_new(store, make_connection("c", "d")).await;
    let watcher = endpoint("watcher", "watch");
    let other = endpoint("other", "watch");

    assert_eq!(
        store.add_subscription(&first.id, &watcher, 1_100).await.unwrap(),
        Some(true)
    );
    assert_eq!(
        store.add_subscription(&first.id, &watcher, 1_200).await.unwrap(),
        Some(false)
    );
    store.add_subscription(&first.id, &other, 1_300).await.unwrap();
    store.add_subscription(&second.id, &watcher, 1_300).await.unwrap();
    assert_eq!(
        store
            .add_subscription(&ConnectionId::from("missing"), &watcher, 1_300)
            .await
            .unwrap(),
        None
    );

    let changed = store
        .remove_subscriptions_of(&ComponentId::from("watcher"), 1_400)
        .await
        .expect("remove_subscriptions_of should succeed");
    assert_eq!(changed, 2);

    let first = store.get(&first.id).await.unwrap().unwrap();
    assert_eq!(first.c2_subscriptions.len(), 1);
    assert!(first.c2_subscriptions.contains(&other));
    let second = store.get(&second.id).await.unwrap().unwrap();
    assert!(second.c2_subscriptions.is_empty());
}

// =============================================================================
// listings
// =============================================================================

pub async fn test_live_listings<S: ConnectionStore>(store: &S) {
    let mut ids = Vec::new();
    for target in ["t1", "t2", "t3", "t4"] {
        ids.push(upsert_new(store, make_connection("hub", target)).await.id);
    }
    let unrelated = upsert_new(store, make_connection("x", "y")).await;
    store.soft_delete(&ids[1], 2_000).await.unwrap();
    ids.remove(1);
    ids.sort();

    let first = store
        .live_involving_after(&ComponentId::from("hub"), None, 2)
        .await
        .expect("first page");
    let second = store
        .live_involving_after(&ComponentId::from("hub"), Some(&first[1].id), 2)
        .await
        .expect("second page");
    let seen: Vec<_> = first.iter().chain(&second).map(|c| c.id.clone()).collect();
    assert_eq!(seen, ids);

    let all = store.live_after(None, 10).await.expect("live_after");
    assert_eq!(all.len(), 4);
    assert!(all.iter().any(|c| c.id == unrelated.id));
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));
}

pub async fn test_query<S: ConnectionStore>(store: &S) {
    let kept = upsert_new(store, make_connection("a", "b")).await;
    let gone = upsert_new(store, make_connection("a", "c")).await;
    upsert_new(store, make_connection("x", "y")).await;
    store.soft_delete(&gone.id, 2_000).await.unwrap();

    let live = store
        .query(&ConnectionQuery {
            component: Some(ComponentId::from("a")),
            ..Default::default()
        })
        .await
        .expect("query should succeed");
    assert_eq!(live.total, 1);
    assert_eq!(live.connections[0].id, kept.id);

    let everything = store
        .query(&ConnectionQuery {
            include_deleted: true,
            offset: 1,
            limit: 1,
            ..Default::default()
        })
        .await
        .expect("query should succeed");
    assert_eq!(everything.total, 3);
    assert_eq!(everything.connections.len(), 1);
}

// =============================================================================
// bulk operations
// =============================================================================

pub async fn test_bulk_operations<S: ConnectionStore>(store: &S) {
    let first = upsert_new(store, make_connection("a", "b")).await;
    upsert_new(store, make_connection("c", "d")).await;
    store.set_enabled(&first.id, false, 1_100).await.unwrap();

    assert_eq!(store.disable_all(1_200).await.expect("disable_all"), 1);
    assert_eq!(store.live_after(None, 10).await.unwrap().len(), 2);

    assert_eq!(store.soft_delete_all(1_300).await.expect("soft_delete_all"), 2);
    assert!(store.live_after(None, 10).await.unwrap().is_empty());

    // Deleted pairs can be joined again.
    upsert_new(store, make_connection("a", "b")).await;

    assert_eq!(store.drop_all().await.expect("drop_all"), 3);
    let page = store
        .query(&ConnectionQuery {
            include_deleted: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all ConnectionStore interface tests against a store implementation.
///
/// The store is emptied before each test.
#[macro_export]
macro_rules! run_connection_store_tests {
    ($store:expr) => {
        use $crate::storage::connection_store_tests::*;
        use mov::storage::ConnectionStore;

        $store.drop_all().await.expect("reset store");
        test_upsert_and_get($store).await;
        println!("  test_upsert_and_get: PASSED");

        $store.drop_all().await.expect("reset store");
        test_upsert_same_pair_returns_existing($store).await;
        println!("  test_upsert_same_pair_returns_existing: PASSED");

        $store.drop_all().await.expect("reset store");
        test_soft_delete_frees_pair($store).await;
        println!("  test_soft_delete_frees_pair: PASSED");

        $store.drop_all().await.expect("reset store");
        test_set_enabled_live_only($store).await;
        println!("  test_set_enabled_live_only: PASSED");

        $store.drop_all().await.expect("reset store");
        test_subscriptions($store).await;
        println!("  test_subscriptions: PASSED");

        $store.drop_all().await.expect("reset store");
        test_live_listings($store).await;
        println!("  test_live_listings: PASSED");

        $store.drop_all().await.expect("reset store");
        test_query($store).await;
        println!("  test_query: PASSED");

        $store.drop_all().await.expect("reset store");
        test_bulk_operations($store).await;
        println!("  test_bulk_operations: PASSED");
    };
}
