//! Integration tests for scene tree delivery through the scene-sync service.

use std::sync::Arc;

use enginelink::services::scene_sync::{
    self, ActorEntry, FriseEntry, ObjectKey, SceneEvent, SceneTree, TreeFlavor,
};
use enginelink::transport::MemoryEngine;
use enginelink::{Blob, Config, ConnectionManager, ConnectionSettings, SceneSyncService};

fn connected_service() -> (MemoryEngine, SceneSyncService) {
    let engine = MemoryEngine::new();
    let manager = Arc::new(ConnectionManager::new(engine.factory()));
    manager
        .initialize(ConnectionSettings::new("127.0.0.1", 4030))
        .unwrap();
    let service = SceneSyncService::new(manager, &Config::default());
    engine.set_online(true);
    service.runtime().tick();
    (engine, service)
}

/// World with two sub-scenes, one of which nests a third level.
fn sample_world(key: impl Fn(u32) -> ObjectKey) -> SceneTree {
    let actor = |id: u32, name: &str, components: &[&str]| ActorEntry {
        key: key(id),
        name: name.to_owned(),
        components_csv: components.join(","),
        script_path: format!("actors/{name}.act"),
    };
    let frise = |id: u32, name: &str| FriseEntry {
        key: key(id),
        name: name.to_owned(),
        config_path: format!("frises/{name}.fcg"),
    };

    let cave = SceneTree {
        name: "cave".into(),
        path: "world/forest/cave.isc".into(),
        actors: vec![actor(30, "bat", &["Animation", "Flight"])],
        frises: vec![frise(31, "stalactite"), frise(32, "floor")],
        children: vec![],
    };
    let forest = SceneTree {
        name: "forest".into(),
        path: "world/forest.isc".into(),
        actors: vec![actor(20, "tree", &[]), actor(21, "owl", &["Animation"])],
        frises: vec![],
        children: vec![cave],
    };
    let town = SceneTree {
        name: "town".into(),
        path: "world/town.isc".into(),
        actors: vec![],
        frises: vec![frise(40, "road")],
        children: vec![],
    };
    SceneTree {
        name: "world".into(),
        path: "world.isc".into(),
        actors: vec![actor(1, "player", &["Renderer", "Physics", "Input"])],
        frises: vec![frise(2, "ground")],
        children: vec![forest, town],
    }
}

fn deliver(
    engine: &MemoryEngine,
    service: &SceneSyncService,
    tree: &SceneTree,
    flavor: TreeFlavor,
) -> SceneEvent {
    let events = service.subscribe();
    engine.push_inbound(&tree.to_message(scene_sync::PLUGIN_NAME, flavor));
    service.runtime().tick();
    events.try_recv().expect("tree event")
}

#[test]
fn test_online_tree_survives_the_wire() {
    let (engine, service) = connected_service();
    let world = sample_world(ObjectKey::Ref);

    let event = deliver(&engine, &service, &world, TreeFlavor::Online);
    let SceneEvent::TreeUpdated { flavor, tree } = event else {
        panic!("unexpected event {event:?}");
    };
    assert_eq!(flavor, TreeFlavor::Online);
    assert_eq!(*tree, world);
    assert_eq!(tree.object_count(), 8);

    let cave = tree.find_scene("cave").unwrap();
    assert_eq!(cave.actors[0].components(), vec!["Animation", "Flight"]);
    assert_eq!(cave.frises[1].key, ObjectKey::Ref(32));
}

#[test]
fn test_offline_tree_keeps_string_keys() {
    let (engine, service) = connected_service();
    let world = sample_world(|id| ObjectKey::Offline(format!("obj-{id:04}")));

    let event = deliver(&engine, &service, &world, TreeFlavor::Offline);
    let SceneEvent::TreeUpdated { flavor, tree } = event else {
        panic!("unexpected event {event:?}");
    };
    assert_eq!(flavor, TreeFlavor::Offline);
    assert_eq!(*tree, world);
    assert_eq!(
        tree.find_scene("town").unwrap().frises[0].key,
        ObjectKey::Offline("obj-0040".into())
    );
    assert_eq!(tree.actors[0].key.as_ref_id(), None);
}

#[test]
fn test_newer_tree_replaces_cached_one() {
    let (engine, service) = connected_service();
    deliver(&engine, &service, &sample_world(ObjectKey::Ref), TreeFlavor::Online);

    let small = SceneTree {
        name: "menu".into(),
        path: "menu.isc".into(),
        ..SceneTree::default()
    };
    deliver(&engine, &service, &small, TreeFlavor::Online);

    let (flavor, latest) = service.latest_tree().unwrap();
    assert_eq!(flavor, TreeFlavor::Online);
    assert_eq!(*latest, small);
}

#[test]
fn test_request_scene_tree_sends_on_next_tick() {
    let (engine, service) = connected_service();
    engine.take_sent();

    service.request_scene_tree();
    service.runtime().tick();

    let mut sent = engine.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].take::<String>().unwrap(), scene_sync::PLUGIN_NAME);
    assert_eq!(sent[0].take::<String>().unwrap(), scene_sync::SEND_SCENE_TREE);
    assert!(sent[0].ensure_consumed().is_ok());
}

#[test]
fn test_message_for_other_plugin_is_not_delivered() {
    let (engine, service) = connected_service();
    let events = service.subscribe();

    let mut msg = Blob::message(
        "PropertiesEditor_Plugin",
        scene_sync::OBJECTS_SELECTED_IN_RUNTIME,
    );
    msg.push(5u32);
    engine.push_inbound(&msg);
    service.runtime().tick();

    assert!(events.try_recv().is_err());
}
