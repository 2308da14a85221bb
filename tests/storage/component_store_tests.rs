//! ComponentStore interface tests.
//!
//! These tests verify the contract of the ComponentStore trait.
//! Each storage implementation should run these tests.

use mov::model::{ChannelSchema, Component, ComponentId, ComponentType};
use mov::payload::{BasicFormat, PayloadSchema};
use mov::storage::{ComponentOrder, ComponentQuery, ComponentStore, StorageError, TextPattern};

/// Create an active component with one text channel.
pub fn make_component(component_type: ComponentType, name: &str, since: i64) -> Component {
    Component {
        id: ComponentId::generate(),
        component_type,
        name: name.to_string(),
        description: Some(format!("{} under test", name)),
        version: "1.0.0".into(),
        api_version: "1.0.0".into(),
        since,
        finished_time: None,
        channels: vec![ChannelSchema::publisher(
            format!("valawai/{}/out", name),
            PayloadSchema::basic(BasicFormat::String),
        )],
    }
}

// =============================================================================
// insert / get
// =============================================================================

pub async fn test_insert_and_get<S: ComponentStore>(store: &S) {
    let component = make_component(ComponentType::C1, "c1_stored", 100);
    store.insert(&component).await.expect("insert should succeed");

    let loaded = store
        .get(&component.id)
        .await
        .expect("get should succeed")
        .expect("component should exist");
    assert_eq!(loaded, component, "component should round-trip intact");

    let missing = store
        .get(&ComponentId::from("missing"))
        .await
        .expect("get should succeed");
    assert!(missing.is_none());
}

pub async fn test_insert_duplicate_id<S: ComponentStore>(store: &S) {
    let component = make_component(ComponentType::C0, "c0_twice", 100);
    store.insert(&component).await.expect("insert should succeed");

    let result = store.insert(&component).await;
    assert!(
        matches!(result, Err(StorageError::DuplicateComponent(_))),
        "second insert should be rejected, got {:?}",
        result
    );
}

// =============================================================================
// finish
// =============================================================================

pub async fn test_finish_once<S: ComponentStore>(store: &S) {
    let component = make_component(ComponentType::C2, "c2_done", 100);
    store.insert(&component).await.expect("insert should succeed");

    let finished = store
        .finish(&component.id, 500)
        .await
        .expect("finish should succeed")
        .expect("first finish should win");
    assert_eq!(finished.finished_time, Some(500));

    let again = store
        .finish(&component.id, 600)
        .await
        .expect("finish should succeed");
    assert!(again.is_none(), "second finish should lose");

    let stored = store.get(&component.id).await.unwrap().unwrap();
    assert_eq!(stored.finished_time, Some(500));
}

pub async fn test_finish_all_and_drop_all<S: ComponentStore>(store: &S) {
    for name in ["c0_one", "c0_two"] {
        store
            .insert(&make_component(ComponentType::C0, name, 100))
            .await
            .expect("insert should succeed");
    }

    assert_eq!(store.finish_all(900).await.expect("finish_all"), 2);
    assert_eq!(store.finish_all(901).await.expect("finish_all"), 0);
    assert!(store.active_after(None, 10).await.unwrap().is_empty());

    assert_eq!(store.drop_all().await.expect("drop_all"), 2);
    let page = store.query(&ComponentQuery::default()).await.unwrap();
    assert_eq!(page.total, 0);
}

// =============================================================================
// active listings
// =============================================================================

pub async fn test_active_after_pages_by_id<S: ComponentStore>(store: &S) {
    let mut ids = Vec::new();
    for i in 0..5 {
        let component = make_component(ComponentType::C1, &format!("c1_page{}", i), 100);
        store.insert(&component).await.expect("insert should succeed");
        ids.push(component.id);
    }
    let mut silent = make_component(ComponentType::C1, "c1_silent", 100);
    silent.channels.clear();
    store.insert(&silent).await.expect("insert should succeed");
    store.finish(&ids[2], 200).await.expect("finish should succeed");
    ids.remove(2);
    ids.sort();

    let first = store.active_after(None, 2).await.expect("first page");
    let second = store
        .active_after(Some(&first[1].id), 2)
        .await
        .expect("second page");
    let third = store
        .active_after(Some(&second[1].id), 2)
        .await
        .expect("third page");

    let seen: Vec<_> = first
        .iter()
        .chain(&second)
        .chain(&third)
        .map(|c| c.id.clone())
        .collect();
    assert_eq!(seen, ids, "pages should cover active components in id order");
    assert!(third.is_empty());
}

pub async fn test_active_named<S: ComponentStore>(store: &S) {
    let first = make_component(ComponentType::C1, "c1_twin", 100);
    let second = make_component(ComponentType::C1, "c1_twin", 200);
    store.insert(&first).await.unwrap();
    store.insert(&second).await.unwrap();
    store
        .insert(&make_component(ComponentType::C1, "c1_other", 100))
        .await
        .unwrap();
    store.finish(&first.id, 300).await.unwrap();

    let named = store.active_named("c1_twin").await.expect("active_named");
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].id, second.id);
}

// =============================================================================
// query
// =============================================================================

pub async fn test_query_filters_and_orders<S: ComponentStore>(store: &S) {
    store
        .insert(&make_component(ComponentType::C0, "c0_camera", 30))
        .await
        .unwrap();
    store
        .insert(&make_component(ComponentType::C1, "c1_alpha", 20))
        .await
        .unwrap();
    store
        .insert(&make_component(ComponentType::C1, "c1_beta", 10))
        .await
        .unwrap();

    let by_type = store
        .query(&ComponentQuery {
            component_type: Some(ComponentType::C1),
            order: ComponentOrder::parse("-since").unwrap(),
            ..Default::default()
        })
        .await
        .expect("query should succeed");
    let names: Vec<_> = by_type.components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(by_type.total, 2);
    assert_eq!(names, vec!["c1_alpha", "c1_beta"]);

    let by_pattern = store
        .query(&ComponentQuery {
            pattern: Some(TextPattern::parse("/^c[01]_(camera|beta)$/").unwrap()),
            order: ComponentOrder::parse("name").unwrap(),
            ..Default::default()
        })
        .await
        .expect("query should succeed");
    let names: Vec<_> = by_pattern.components.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["c0_camera", "c1_beta"]);

    let window = store
        .query(&ComponentQuery {
            order: ComponentOrder::parse("since").unwrap(),
            offset: 1,
            limit: 1,
            ..Default::default()
        })
        .await
        .expect("query should succeed");
    assert_eq!(window.total, 3, "total ignores the window");
    assert_eq!(window.components.len(), 1);
    assert_eq!(window.components[0].name, "c1_alpha");
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all ComponentStore interface tests against a store implementation.
///
/// The store is emptied before each test.
#[macro_export]
macro_rules! run_component_store_tests {
    ($store:expr) => {
        use $crate::storage::component_store_tests::*;
        use mov::storage::ComponentStore;

        $store.drop_all().await.expect("reset store");
        test_insert_and_get($store).await;
        println!("  test_insert_and_get: PASSED");

        $store.drop_all().await.expect("reset store");
        test_insert_duplicate_id($store).await;
        println!("  test_insert_duplicate_id: PASSED");

        $store.drop_all().await.expect("reset store");
        test_finish_once($store).await;
        println!("  test_finish_once: PASSED");

        $store.drop_all().await.expect("reset store");
        test_finish_all_and_drop_all($store).await;
        println!("  test_finish_all_and_drop_all: PASSED");

        $store.drop_all().await.expect("reset store");
        test_active_after_pages_by_id($store).await;
        println!("  test_active_after_pages_by_id: PASSED");

        $store.drop_all().await.expect("reset store");
        test_active_named($store).await;
        println!("  test_active_named: PASSED");

        $store.drop_all().await.expect("reset store");
        test_query_filters_and_orders($store).await;
        println!("  test_query_filters_and_orders: PASSED");
    };
}
