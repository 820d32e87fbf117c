//! Calls made outside any transaction go straight to the store.

use std::rc::Rc;

use arbor_graph::{ClientConfig, Direction, EntityKind, GraphClient, GraphError};
use arbor_testkit::{init_tracing, MemoryStore, TEST_BASE_URL};
use serde_json::{json, Map, Value};

fn setup() -> (GraphClient, Rc<MemoryStore>) {
    init_tracing();
    let store = Rc::new(MemoryStore::new());
    let client = GraphClient::new(store.clone(), ClientConfig::with_base_url(TEST_BASE_URL));
    (client, store)
}

fn props(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_create_and_update_node() {
    let (client, store) = setup();
    let n = client.create_node(props(json!({"name": "a"}))).unwrap();
    assert!(n.is_bound());
    assert_eq!(n.url().unwrap(), store.node_url(1));
    assert_eq!(store.request_count(), 1);

    n.set("age", 7).unwrap();
    assert_eq!(store.node_properties(1), Some(props(json!({"name": "a", "age": 7}))));
    assert_eq!(n.get("age").unwrap(), Some(json!(7)));

    n.remove("name").unwrap();
    assert_eq!(store.node_properties(1), Some(props(json!({"age": 7}))));
    assert_eq!(n.get("name").unwrap(), None);
    assert_eq!(store.request_count(), 3);
}

#[test]
fn test_fetched_node_loads_lazily() {
    let (client, store) = setup();
    let a = store.insert_node(json!({}));
    let b = store.insert_node(json!({}));
    let rel = store.insert_relationship(a, b, "KNOWS", json!({"w": 1}));

    let r = client.relationship(rel).unwrap();
    assert_eq!(r.rel_type().unwrap(), "KNOWS");
    store.clear_requests();

    // the start handle is fetched on first read
    let start = r.start().unwrap();
    assert_eq!(store.request_count(), 0);
    assert_eq!(start.url().unwrap(), store.node_url(a));
    assert_eq!(start.properties().unwrap(), Map::new());
    assert_eq!(store.request_count(), 1);
}

#[test]
fn test_relate_and_list() {
    let (client, store) = setup();
    let a = client.create_node(Map::new()).unwrap();
    let b = client.create_node(Map::new()).unwrap();
    let r = a.relate("FOLLOWS", &b, props(json!({"since": 1}))).unwrap();

    assert_eq!(r.kind(), EntityKind::Relationship);
    assert_eq!(store.relationship_ends(1), Some((1, 2, "FOLLOWS".to_string())));
    assert!(r.end().unwrap().same_entity(&b));

    let outgoing = a.relationships(Direction::Outgoing).unwrap().items().unwrap();
    assert_eq!(outgoing.len(), 1);
    assert!(outgoing[0].same_entity(&r));
    let incoming = a.relationships(Direction::Incoming).unwrap().items().unwrap();
    assert!(incoming.is_empty());
    assert_eq!(b.relationships(Direction::All).unwrap().items().unwrap().len(), 1);
}

#[test]
fn test_read_property_as_scalar() {
    let (client, _store) = setup();
    let n = client.create_node(props(json!({"name": "ann"}))).unwrap();
    let name = n.read_property("name").unwrap();
    assert_eq!(name.kind(), EntityKind::Scalar);
    assert_eq!(name.value().unwrap(), json!("ann"));

    let err = n.read_property("missing").unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_delete_tombstones_immediately() {
    let (client, store) = setup();
    let n = client.create_node(Map::new()).unwrap();
    n.delete().unwrap();
    assert!(!n.is_present());
    assert_eq!(store.node_count(), 0);
}

#[test]
fn test_delete_blocked_by_relationships() {
    let (client, _store) = setup();
    let a = client.create_node(Map::new()).unwrap();
    let b = client.create_node(Map::new()).unwrap();
    a.relate("KNOWS", &b, Map::new()).unwrap();

    let err = a.delete().unwrap_err();
    match err {
        GraphError::Status { status, reason, .. } => {
            assert_eq!(status, 409);
            assert_eq!(reason, "Conflict");
        }
        other => panic!("expected a status error, got {other}"),
    }
    assert!(a.is_present());
}

#[test]
fn test_missing_node_is_not_found() {
    let (client, _store) = setup();
    let err = client.node(42).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.status(), Some(404));
}

#[test]
fn test_refresh_tombstones_deleted_entity() {
    let (client, store) = setup();
    let id = store.insert_node(json!({"v": 1}));
    let first = client.node(id).unwrap();
    let second = client.node(id).unwrap();

    second.delete().unwrap();
    assert!(first.is_present());
    first.entity().unwrap().refresh().unwrap();
    assert!(!first.is_present());
}

#[test]
fn test_indexes() {
    let (client, store) = setup();
    let created = client.create_node_index("people").unwrap();
    assert_eq!(created.kind(), EntityKind::IndexNode);
    let ann = client.create_node(props(json!({"name": "ann"}))).unwrap();

    let index = client.node_index("people");
    assert!(index.same_entity(&created));
    index.index_add("name", "ann lee", &ann).unwrap();
    assert_eq!(store.node_index_ids("people", "name", "ann lee"), vec![1]);

    let found = index.index_query("name", "ann lee").unwrap().items().unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].same_entity(&ann));

    index.index_remove("name", "ann lee", &ann).unwrap();
    assert!(store.node_index_ids("people", "name", "ann lee").is_empty());
}

#[test]
fn test_relationship_index_takes_relationships_only() {
    let (client, _store) = setup();
    let index = client.create_relationship_index("links").unwrap();
    let n = client.create_node(Map::new()).unwrap();
    assert!(matches!(
        index.index_add("k", "v", &n),
        Err(GraphError::InvalidCapability { capability: "index_add", kind: EntityKind::Node })
    ));
}

#[test]
fn test_transport_failure_propagates_unchanged() {
    let (client, store) = setup();
    store.set_offline(true);
    let err = client.create_node(Map::new()).unwrap_err();
    assert!(matches!(err, GraphError::Transport(_)));
    assert!(err.to_string().contains("connection refused"));
}
