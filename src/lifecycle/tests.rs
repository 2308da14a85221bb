use super::*;
use crate::model::{ChannelSchema, ComponentType};
use crate::test_utils::{component, text, Harness};

async fn pair(harness: &Harness) -> (Endpoint, Endpoint) {
    let producer = harness
        .add(component(
            ComponentType::C0,
            "c0_sensor",
            vec![ChannelSchema::publisher("valawai/c0/sensor/data", text())],
        ))
        .await;
    let consumer = harness
        .add(component(
            ComponentType::C1,
            "c1_planner",
            vec![ChannelSchema::subscriber("valawai/c1/planner/data", text())],
        ))
        .await;
    (
        Endpoint::new(producer.id, "valawai/c0/sensor/data"),
        Endpoint::new(consumer.id, "valawai/c1/planner/data"),
    )
}

fn request(source: &Endpoint, target: &Endpoint) -> CreateConnection {
    CreateConnection {
        source: source.clone(),
        target: target.clone(),
        enabled: true,
    }
}

#[tokio::test]
async fn test_create_announces_enable_once() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(10);
    let (source, target) = pair(&harness).await;

    let first = lifecycle.create(request(&source, &target)).await.unwrap();
    let second = lifecycle.create(request(&source, &target)).await.unwrap();

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.connection().id, second.connection().id);

    let enables = harness.notifier.with_action(TopologyAction::Enable).await;
    assert_eq!(enables.len(), 1);
    assert_eq!(enables[0].connection_id, first.connection().id);
}

#[tokio::test]
async fn test_create_disabled_is_silent() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(10);
    let (source, target) = pair(&harness).await;

    let mut disabled = request(&source, &target);
    disabled.enabled = false;
    let created = lifecycle.create(disabled).await.unwrap();

    assert!(!created.connection().enabled);
    assert!(harness.notifier.changes().await.is_empty());
}

#[tokio::test]
async fn test_create_checks_channel_direction() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(10);
    let (source, target) = pair(&harness).await;

    let reversed = lifecycle.create(request(&target, &source)).await;
    assert!(matches!(reversed, Err(LifecycleError::Validation(_))));

    let unknown = Endpoint::new(source.component_id.clone(), "valawai/c0/sensor/other");
    let missing_channel = lifecycle.create(request(&unknown, &target)).await;
    assert!(matches!(missing_channel, Err(LifecycleError::Validation(_))));

    harness
        .components
        .finish(&target.component_id, model::now())
        .await
        .unwrap();
    let finished = lifecycle.create(request(&source, &target)).await;
    assert!(matches!(finished, Err(LifecycleError::Validation(_))));
}

#[tokio::test]
async fn test_set_state_toggles_and_announces() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(10);
    let (source, target) = pair(&harness).await;
    let id = lifecycle
        .create(request(&source, &target))
        .await
        .unwrap()
        .into_connection()
        .id;
    harness.notifier.clear().await;

    let disabled = lifecycle.set_state(&id, TopologyAction::Disable).await.unwrap();
    assert!(!disabled.enabled);
    let enabled = lifecycle.set_state(&id, TopologyAction::Enable).await.unwrap();
    assert!(enabled.enabled);

    let actions: Vec<_> = harness
        .notifier
        .changes()
        .await
        .into_iter()
        .map(|c| c.action)
        .collect();
    assert_eq!(actions, vec![TopologyAction::Disable, TopologyAction::Enable]);
}

#[tokio::test]
async fn test_set_state_on_removed_connection_is_not_found() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(10);
    let (source, target) = pair(&harness).await;
    let id = lifecycle
        .create(request(&source, &target))
        .await
        .unwrap()
        .into_connection()
        .id;

    let removed = lifecycle.set_state(&id, TopologyAction::Remove).await.unwrap();
    assert!(removed.deleted_timestamp.is_some());
    assert!(!removed.enabled);

    assert!(matches!(
        lifecycle.set_state(&id, TopologyAction::Enable).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(matches!(
        lifecycle.remove(&id).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert_eq!(
        harness.notifier.with_action(TopologyAction::Remove).await.len(),
        1
    );
}

#[tokio::test]
async fn test_notify_failure_keeps_state_change() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(10);
    let (source, target) = pair(&harness).await;
    harness.notifier.set_fail_on_notify(true).await;

    let created = lifecycle.create(request(&source, &target)).await.unwrap();
    let id = created.connection().id.clone();
    lifecycle.set_state(&id, TopologyAction::Disable).await.unwrap();

    let stored = lifecycle.get(&id).await.unwrap().unwrap();
    assert!(stored.is_live());
    assert!(!stored.enabled);
}

#[tokio::test]
async fn test_add_subscription_is_idempotent() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(10);
    let (source, target) = pair(&harness).await;
    let id = lifecycle
        .create(request(&source, &target))
        .await
        .unwrap()
        .into_connection()
        .id;
    let watcher = Endpoint::new(ComponentId::from("watcher"), "valawai/c2/watcher/data");

    assert!(lifecycle.add_subscription(&id, &watcher).await.unwrap());
    assert!(!lifecycle.add_subscription(&id, &watcher).await.unwrap());
    assert!(matches!(
        lifecycle
            .add_subscription(&ConnectionId::from("missing"), &watcher)
            .await,
        Err(LifecycleError::NotFound(_))
    ));

    assert_eq!(
        lifecycle
            .remove_all_subscriptions_of(&watcher.component_id)
            .await
            .unwrap(),
        1
    );
    let stored = lifecycle.get(&id).await.unwrap().unwrap();
    assert!(stored.c2_subscriptions.is_empty());
}

#[tokio::test]
async fn test_close_connections_of_spans_pages() {
    let harness = Harness::new();
    // Page size smaller than the connection count forces several pages.
    let lifecycle = harness.lifecycle(2);
    let hub = harness
        .add(component(
            ComponentType::C1,
            "c1_hub",
            vec![ChannelSchema::subscriber("valawai/c1/hub/in", text())],
        ))
        .await;
    let hub_in = Endpoint::new(hub.id.clone(), "valawai/c1/hub/in");

    let mut expected = Vec::new();
    for i in 0..5 {
        let name = format!("c0_source_{i}");
        let channel = format!("valawai/c0/source_{i}/out");
        let producer = harness
            .add(component(
                ComponentType::C0,
                &name,
                vec![ChannelSchema::publisher(channel.clone(), text())],
            ))
            .await;
        let created = lifecycle
            .create(request(&Endpoint::new(producer.id, channel), &hub_in))
            .await
            .unwrap();
        expected.push(created.into_connection().id);
    }
    harness.notifier.clear().await;

    let mut closed = lifecycle.close_connections_of(&hub.id).await.unwrap();
    closed.sort();
    expected.sort();
    assert_eq!(closed, expected);

    let removes = harness.notifier.with_action(TopologyAction::Remove).await;
    assert_eq!(removes.len(), 5);

    // Nothing left to close the second time round.
    assert!(lifecycle.close_connections_of(&hub.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_connections_of_propagates_listing_failure() {
    let harness = Harness::new();
    let lifecycle = harness.lifecycle(10);
    harness.connections.set_unavailable(true).await;

    let result = lifecycle
        .close_connections_of(&ComponentId::from("anything"))
        .await;
    assert!(matches!(result, Err(StorageError::Unavailable(_))));
}
