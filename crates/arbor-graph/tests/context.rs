//! Transaction resolution and scoping.

use std::rc::Rc;

use arbor_graph::{CallArg, ClientConfig, GraphClient, GraphError, TransactionOptions};
use arbor_testkit::{init_tracing, MemoryStore, TEST_BASE_URL};
use serde_json::{json, Map, Value};

fn setup() -> (GraphClient, Rc<MemoryStore>) {
    init_tracing();
    let store = Rc::new(MemoryStore::new());
    let client = GraphClient::new(store.clone(), ClientConfig::with_base_url(TEST_BASE_URL));
    (client, store)
}

#[test]
fn test_explicit_beats_scoped_beats_none() {
    let (client, _store) = setup();
    let context = client.context().clone();
    let outer = client.transaction();
    let inner = client.transaction();

    assert!(context.resolve_current_transaction(None).is_none());

    let outer_scope = outer.enter();
    assert_eq!(client.current_transaction().unwrap().id(), outer.id());
    {
        let _inner_scope = inner.enter();
        assert_eq!(context.depth(), 2);
        assert_eq!(client.current_transaction().unwrap().id(), inner.id());

        let explicit = context.resolve_current_transaction(Some(&outer)).unwrap();
        assert_eq!(explicit.id(), outer.id());

        let paired = (Value::from(1), outer.clone());
        let resolved = context.resolve_current_transaction(Some(&paired)).unwrap();
        assert_eq!(resolved.id(), outer.id());
    }
    assert_eq!(context.depth(), 1);
    assert_eq!(client.current_transaction().unwrap().id(), outer.id());

    drop(outer_scope);
    assert_eq!(context.depth(), 0);
    assert!(client.current_transaction().is_none());
}

#[test]
fn test_only_trailing_transaction_argument_counts() {
    let (client, _store) = setup();
    let context = client.context().clone();
    let tx = client.transaction();

    let trailing = vec![CallArg::Value(json!("x")), CallArg::Transaction(tx.clone())];
    let resolved = context.resolve_current_transaction(Some(&trailing)).unwrap();
    assert_eq!(resolved.id(), tx.id());

    let leading = vec![CallArg::Transaction(tx.clone()), CallArg::Value(json!("x"))];
    assert!(context.resolve_current_transaction(Some(&leading)).is_none());
}

#[test]
fn test_explicit_transaction_overrides_scoped_one() {
    let (client, store) = setup();
    let n = client.create_node(Map::new()).unwrap();
    let scoped = client.transaction();
    let explicit = client.transaction();
    {
        let _scope = scoped.enter();
        n.set_in("a", 1, &explicit).unwrap();
        let args = vec![CallArg::Value(json!("b")), CallArg::Transaction(explicit.clone())];
        n.set_in("b", 2, args).unwrap();
        let created = client
            .create_node_in((Value::from(0), explicit.clone()), Map::new())
            .unwrap();
        assert_eq!(created.transaction_id(), Some(explicit.id()));
        n.set("c", 3).unwrap();

        // a pending proxy cannot be pulled into another transaction
        let pending = scoped.create_node(Map::new()).unwrap();
        assert!(matches!(
            pending.set_in("d", 4, &explicit),
            Err(GraphError::ForeignProxy { .. })
        ));
    }
    assert_eq!(explicit.len(), 2);
    assert_eq!(scoped.len(), 2);
    assert_eq!(store.request_count(), 1);

    explicit.commit().unwrap();
    let mut expected = Map::new();
    expected.insert("a".to_string(), json!(1));
    expected.insert("b".to_string(), json!(2));
    assert_eq!(store.node_properties(1), Some(expected));
    assert_eq!(store.node_count(), 2);
}

#[test]
fn test_scoped_calls_are_recorded() {
    let (client, store) = setup();
    let tx = client.transaction();
    let n = {
        let _scope = tx.enter();
        client.create_node(Map::new()).unwrap()
    };
    assert_eq!(n.transaction_id(), Some(tx.id()));
    assert_eq!(store.request_count(), 0);

    // outside the scope the same call runs immediately
    let m = client.create_node(Map::new()).unwrap();
    assert!(m.is_bound());
    assert_eq!(store.request_count(), 1);
}

#[test]
fn test_scope_released_on_every_exit() {
    let (client, store) = setup();

    // the lookup is only recorded, so the failure surfaces at commit
    let err = client
        .in_transaction(|_tx| {
            client.create_node(Map::new())?;
            client.node(99)?;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(store.node_count(), 0);
    assert_eq!(client.context().depth(), 0);

    let err = client
        .in_transaction(|tx| -> Result<(), GraphError> {
            Err(GraphError::TransactionSpent(tx.id()))
        })
        .unwrap_err();
    assert!(matches!(err, GraphError::TransactionSpent(_)));
    assert_eq!(client.context().depth(), 0);
}

#[test]
fn test_in_transaction_commits_and_returns_value() {
    let (client, store) = setup();
    let n = client
        .in_transaction(|_tx| {
            let n = client.create_node(Map::new())?;
            n.set("a", 1)?;
            Ok(n)
        })
        .unwrap();

    assert!(n.is_bound());
    assert_eq!(n.get("a").unwrap(), Some(json!(1)));
    assert_eq!(store.batch_count(), 1);
}

#[test]
fn test_manual_commit_mode() {
    let (client, store) = setup();
    let options = TransactionOptions {
        auto_commit: false,
        auto_update: false,
    };
    let n = client
        .in_transaction_with(options, |_tx| client.create_node(Map::new()))
        .unwrap();

    assert!(!n.is_bound());
    assert_eq!(store.request_count(), 0);
}

#[test]
fn test_registry_tracks_open_transactions() {
    let (client, _store) = setup();
    let context = client.context().clone();
    let tx = client.transaction();
    assert_eq!(context.get(tx.id()).unwrap().id(), tx.id());
    assert_eq!(context.active_count(), 1);

    tx.commit().unwrap();
    assert!(context.get(tx.id()).is_none());

    let dropped_id = client.transaction().id();
    assert!(context.get(dropped_id).is_none());
    assert_eq!(context.active_count(), 0);
}
