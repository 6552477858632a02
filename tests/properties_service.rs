//! Integration tests for the property editing service.

use std::sync::Arc;

use enginelink::services::properties::{self, PropertyEvent};
use enginelink::transport::MemoryEngine;
use enginelink::{Blob, Config, ConnectionManager, ConnectionSettings, PropertyEditService};
use tempfile::TempDir;

fn connected_service() -> (MemoryEngine, PropertyEditService) {
    let engine = MemoryEngine::new();
    let manager = Arc::new(ConnectionManager::new(engine.factory()));
    manager
        .initialize(ConnectionSettings::new("127.0.0.1", 4030))
        .unwrap();
    let service = PropertyEditService::new(manager, &Config::default());
    engine.set_online(true);
    service.runtime().tick();
    (engine, service)
}

fn reply(object_ref: u32, xml: &str) -> Blob {
    let mut blob = Blob::message(properties::PLUGIN_NAME, properties::PROPERTIES);
    blob.push(object_ref).push_str(xml);
    blob
}

/// Replies carry no request id: two overlapping updates are answered in
/// whatever order the engine sends, and the service reports exactly that
/// order.
#[test]
fn test_overlapping_replies_follow_arrival_order() {
    let (engine, service) = connected_service();
    let events = service.subscribe();

    service.update_properties(1, "<A v=\"1\"/>");
    service.update_properties(2, "<B v=\"1\"/>");
    service.runtime().tick();

    engine.push_inbound(&reply(2, "<B v=\"2\"/>"));
    engine.push_inbound(&reply(1, "<A v=\"2\"/>"));
    service.runtime().tick();

    let received: Vec<PropertyEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            PropertyEvent::Updated {
                object_ref: 2,
                xml: "<B v=\"2\"/>".into()
            },
            PropertyEvent::Updated {
                object_ref: 1,
                xml: "<A v=\"2\"/>".into()
            },
        ]
    );
}

#[test]
fn test_updates_sent_in_enqueue_order() {
    let (engine, service) = connected_service();
    engine.take_sent();

    for i in 0..5u32 {
        service.update_properties(7, format!("<v>{i}</v>"));
    }
    service.runtime().tick();

    let xml: Vec<String> = engine
        .take_sent()
        .into_iter()
        .map(|mut blob| {
            blob.take::<String>().unwrap();
            blob.take::<String>().unwrap();
            assert_eq!(blob.take::<u32>().unwrap(), 7);
            blob.take::<String>().unwrap()
        })
        .collect();
    assert_eq!(xml, (0..5).map(|i| format!("<v>{i}</v>")).collect::<Vec<_>>());
}

#[test]
fn test_updates_wait_for_connection() {
    let engine = MemoryEngine::new();
    let manager = Arc::new(ConnectionManager::new(engine.factory()));
    manager
        .initialize(ConnectionSettings::new("127.0.0.1", 4030))
        .unwrap();
    let service = PropertyEditService::new(manager, &Config::default());

    service.update_properties(3, "<x/>");
    service.runtime().tick();
    assert!(engine.sent().is_empty());
    assert!(!service.is_connected());

    engine.set_online(true);
    service.runtime().tick();
    assert_eq!(
        engine.sent_opcodes(properties::PLUGIN_NAME),
        vec!["PluginId", properties::PROPERTIES]
    );
}

#[test]
fn test_dump_writes_wire_text_verbatim() {
    let (engine, service) = connected_service();
    let xml = "<?xml version=\"1.0\"?>\n<Actor name=\"héro\">\n  <Scale>1.5</Scale>\n</Actor>\n";
    engine.push_inbound(&reply(11, xml));
    service.runtime().tick();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("actor_11.xml");
    service.dump_properties(11, &path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), xml);
}
