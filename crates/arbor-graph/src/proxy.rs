//! Lazy entity references.
//!
//! A proxy starts either bound (to an entity that already exists) or
//! unbound (standing for the result of a recorded operation). Commit swaps
//! the state of every unbound proxy in place, so every clone handed out
//! before commit observes the binding.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use arbor_core::{EntityKind, JobId, Method, TransactionId};
use serde_json::{json, Map, Value};

use crate::client::GraphClient;
use crate::context::TransactionArg;
use crate::entity::{Entity, Node};
use crate::error::{GraphError, Result};
use crate::operation::{Effect, Recording};
use crate::queries::{encode_segment, Direction};
use crate::transaction::{Transaction, TransactionInner};

/// Local state an unbound proxy starts with.
#[derive(Debug, Default)]
pub(crate) struct Seed {
    pub properties: Map<String, Value>,
    pub rel_type: Option<String>,
    pub end: Option<Proxy>,
    /// The entity a pending index entry was added for.
    pub entry: Option<Proxy>,
}

impl Seed {
    pub fn properties(properties: Map<String, Value>) -> Self {
        Self {
            properties,
            ..Default::default()
        }
    }
}

struct Pending {
    kind: EntityKind,
    job: JobId,
    transaction_id: TransactionId,
    transaction: Weak<TransactionInner>,
    seed: Seed,
}

enum ProxyState {
    Unbound(Pending),
    Bound(Entity),
}

/// Cheap snapshot of the state, taken so no borrow is held across calls.
enum View {
    Unbound { job: JobId, tx: Transaction },
    Bound(Entity),
}

/// Handle on an entity that may not exist yet.
#[derive(Clone)]
pub struct Proxy {
    client: GraphClient,
    state: Rc<RefCell<ProxyState>>,
}

impl Proxy {
    pub(crate) fn unbound(tx: &Transaction, kind: EntityKind, job: JobId, seed: Seed) -> Self {
        Self {
            client: tx.client().clone(),
            state: Rc::new(RefCell::new(ProxyState::Unbound(Pending {
                kind,
                job,
                transaction_id: tx.id(),
                transaction: tx.downgrade(),
                seed,
            }))),
        }
    }

    /// Wrap an entity that already exists.
    pub fn bound(client: &GraphClient, entity: Entity) -> Self {
        Self {
            client: client.clone(),
            state: Rc::new(RefCell::new(ProxyState::Bound(entity))),
        }
    }

    /// Bind to the committed result. Only the first binding takes effect.
    pub(crate) fn bind(&self, entity: Entity) -> bool {
        let mut state = self.state.borrow_mut();
        if matches!(*state, ProxyState::Bound(_)) {
            return false;
        }
        *state = ProxyState::Bound(entity);
        true
    }

    fn view(&self) -> Result<View> {
        match &*self.state.borrow() {
            ProxyState::Bound(entity) => Ok(View::Bound(entity.clone())),
            ProxyState::Unbound(pending) => pending
                .transaction
                .upgrade()
                .map(|inner| View::Unbound {
                    job: pending.job,
                    tx: Transaction::from_inner(inner),
                })
                .ok_or(GraphError::TransactionDropped { job: pending.job }),
        }
    }

    fn require(&self, capability: &'static str, allowed: bool) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(GraphError::InvalidCapability {
                capability,
                kind: self.kind(),
            })
        }
    }

    // ── Identity ─────────────────────────────────────────────────

    pub fn kind(&self) -> EntityKind {
        match &*self.state.borrow() {
            ProxyState::Unbound(pending) => pending.kind,
            ProxyState::Bound(entity) => entity.kind(),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(*self.state.borrow(), ProxyState::Bound(_))
    }

    /// The job whose result this proxy stands for, while unbound.
    pub fn job(&self) -> Option<JobId> {
        match &*self.state.borrow() {
            ProxyState::Unbound(pending) => Some(pending.job),
            ProxyState::Bound(_) => None,
        }
    }

    /// The transaction this proxy belongs to, while unbound.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match &*self.state.borrow() {
            ProxyState::Unbound(pending) => Some(pending.transaction_id),
            ProxyState::Bound(_) => None,
        }
    }

    /// The owning transaction of an unbound proxy.
    pub(crate) fn owning_transaction(&self) -> Result<Option<Transaction>> {
        match self.view()? {
            View::Unbound { tx, .. } => Ok(Some(tx)),
            View::Bound(_) => Ok(None),
        }
    }

    /// The bound entity.
    pub fn entity(&self) -> Result<Entity> {
        match &*self.state.borrow() {
            ProxyState::Bound(entity) => Ok(entity.clone()),
            ProxyState::Unbound(pending) => Err(GraphError::Unbound { job: pending.job }),
        }
    }

    /// Identity URL; fails until bound.
    pub fn url(&self) -> Result<String> {
        let entity = self.entity()?;
        entity.url().ok_or(GraphError::InvalidCapability {
            capability: "url",
            kind: entity.kind(),
        })
    }

    /// False once the underlying entity is known to be deleted.
    pub fn is_present(&self) -> bool {
        match &*self.state.borrow() {
            ProxyState::Bound(entity) => entity.is_present(),
            ProxyState::Unbound(_) => true,
        }
    }

    /// Whether both proxies stand for the same entity.
    pub fn same_entity(&self, other: &Proxy) -> bool {
        if Rc::ptr_eq(&self.state, &other.state) {
            return true;
        }
        match (&*self.state.borrow(), &*other.state.borrow()) {
            (ProxyState::Bound(a), ProxyState::Bound(b)) => a.same_as(b),
            (ProxyState::Unbound(a), ProxyState::Unbound(b)) => {
                a.transaction_id == b.transaction_id && a.job == b.job
            }
            _ => false,
        }
    }

    // ── Properties ───────────────────────────────────────────────

    /// All properties. Unbound proxies answer from locally recorded state.
    pub fn properties(&self) -> Result<Map<String, Value>> {
        self.require("properties", self.kind().is_property_container())?;
        match self.view()? {
            View::Bound(entity) => entity.properties(),
            View::Unbound { .. } => match self.indexed_entity() {
                Some(entry) => entry.properties(),
                None => Ok(self.local_properties()),
            },
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.require("get", self.kind().is_property_container())?;
        match self.view()? {
            View::Bound(entity) => entity.get(key),
            View::Unbound { .. } => match self.indexed_entity() {
                Some(entry) => entry.get(key),
                None => Ok(self.local_properties().get(key).cloned()),
            },
        }
    }

    fn local_properties(&self) -> Map<String, Value> {
        match &*self.state.borrow() {
            ProxyState::Unbound(pending) => pending.seed.properties.clone(),
            ProxyState::Bound(_) => Map::new(),
        }
    }

    fn edit_local(&self, edit: impl FnOnce(&mut Map<String, Value>)) {
        if let ProxyState::Unbound(pending) = &mut *self.state.borrow_mut() {
            edit(&mut pending.seed.properties);
        }
    }

    /// For a pending index entry, the entity it was added for.
    fn indexed_entity(&self) -> Option<Proxy> {
        match &*self.state.borrow() {
            ProxyState::Unbound(pending) => pending.seed.entry.clone(),
            ProxyState::Bound(_) => None,
        }
    }

    /// Set one property.
    ///
    /// Inside a transaction this records a PUT that merges with earlier
    /// writes to the same entity; otherwise it is sent immediately.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.set_with(key, value.into(), None)
    }

    /// Like [`set`](Self::set), recorded into the transaction `tx` carries.
    pub fn set_in(
        &self,
        key: &str,
        value: impl Into<Value>,
        tx: impl TransactionArg,
    ) -> Result<()> {
        self.set_with(key, value.into(), Some(&tx))
    }

    fn set_with(
        &self,
        key: &str,
        value: Value,
        explicit: Option<&dyn TransactionArg>,
    ) -> Result<()> {
        self.require("set", self.kind().is_property_container())?;
        match self.client.select_transaction(&[self], explicit)? {
            Some(tx) if self.is_bound() => {
                tx.record_property(self, self.entity()?.cached_properties(), key, value)?;
            }
            Some(tx) => {
                tx.record_property(self, Some(self.local_properties()), key, value.clone())?;
                self.edit_local(|props| {
                    props.insert(key.to_string(), value);
                });
            }
            None => {
                let entity = self.entity()?;
                self.client.set_property_now(&self.url()?, key, &value)?;
                entity.set_cached(key, value);
            }
        }
        Ok(())
    }

    /// Remove one property.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.remove_with(key, None)
    }

    pub fn remove_in(&self, key: &str, tx: impl TransactionArg) -> Result<()> {
        self.remove_with(key, Some(&tx))
    }

    fn remove_with(&self, key: &str, explicit: Option<&dyn TransactionArg>) -> Result<()> {
        self.require("remove", self.kind().is_property_container())?;
        match self.client.select_transaction(&[self], explicit)? {
            Some(tx) if self.is_bound() => {
                tx.record_removal(self, self.entity()?.cached_properties(), key)?;
            }
            Some(tx) => {
                tx.record_removal(self, Some(self.local_properties()), key)?;
                self.edit_local(|props| {
                    props.remove(key);
                });
            }
            None => {
                let entity = self.entity()?;
                self.client.remove_property_now(&self.url()?, key)?;
                entity.remove_cached(key);
            }
        }
        Ok(())
    }

    /// Read one property through the store, as a scalar proxy.
    pub fn read_property(&self, key: &str) -> Result<Proxy> {
        self.read_property_with(key, None)
    }

    pub fn read_property_in(&self, key: &str, tx: impl TransactionArg) -> Result<Proxy> {
        self.read_property_with(key, Some(&tx))
    }

    fn read_property_with(
        &self,
        key: &str,
        explicit: Option<&dyn TransactionArg>,
    ) -> Result<Proxy> {
        self.require("read_property", self.kind().is_property_container())?;
        let suffix = format!("/properties/{}", encode_segment(key));
        match self.client.select_transaction(&[self], explicit)? {
            Some(tx) => tx.record_pending(
                Recording::new(Method::Get, tx.target_for(self, &suffix)?),
                EntityKind::Scalar,
                Seed::default(),
            ),
            None => {
                let entity = self.client.property_now(&self.url()?, key)?;
                Ok(Proxy::bound(&self.client, entity))
            }
        }
    }

    /// Delete the entity. Once confirmed, the handle is tombstoned.
    pub fn delete(&self) -> Result<()> {
        self.delete_with(None)
    }

    pub fn delete_in(&self, tx: impl TransactionArg) -> Result<()> {
        self.delete_with(Some(&tx))
    }

    fn delete_with(&self, explicit: Option<&dyn TransactionArg>) -> Result<()> {
        self.require("delete", self.kind().is_property_container())?;
        match self.client.select_transaction(&[self], explicit)? {
            Some(tx) => {
                tx.record(
                    Recording::new(Method::Delete, tx.target_for(self, "")?)
                        .owner(self.clone())
                        .effect(Effect::DeleteEntity),
                )?;
            }
            None => {
                let entity = self.entity()?;
                self.client.delete_now(&self.url()?)?;
                entity.tombstone();
            }
        }
        Ok(())
    }

    // ── Nodes ────────────────────────────────────────────────────

    /// Create a relationship from this node to `to`.
    pub fn relate(
        &self,
        rel_type: &str,
        to: &Proxy,
        properties: Map<String, Value>,
    ) -> Result<Proxy> {
        self.relate_with(rel_type, to, properties, None)
    }

    pub fn relate_in(
        &self,
        rel_type: &str,
        to: &Proxy,
        properties: Map<String, Value>,
        tx: impl TransactionArg,
    ) -> Result<Proxy> {
        self.relate_with(rel_type, to, properties, Some(&tx))
    }

    fn relate_with(
        &self,
        rel_type: &str,
        to: &Proxy,
        properties: Map<String, Value>,
        explicit: Option<&dyn TransactionArg>,
    ) -> Result<Proxy> {
        self.require("relate", self.kind() == EntityKind::Node)?;
        to.require("relate", to.kind() == EntityKind::Node)?;
        match self.client.select_transaction(&[self, to], explicit)? {
            Some(tx) => {
                let body = json!({
                    "to": tx.reference_for(to)?,
                    "type": rel_type,
                    "data": properties,
                });
                tx.record_pending(
                    Recording::new(Method::Post, tx.target_for(self, "/relationships")?)
                        .body(body),
                    EntityKind::Relationship,
                    Seed {
                        properties,
                        rel_type: Some(rel_type.to_string()),
                        end: Some(to.clone()),
                        entry: None,
                    },
                )
            }
            None => {
                let entity =
                    self.client
                        .relate_now(&self.url()?, &to.url()?, rel_type, properties)?;
                Ok(Proxy::bound(&self.client, entity))
            }
        }
    }

    /// Relationships of this node, as an iterable proxy.
    pub fn relationships(&self, direction: Direction) -> Result<Proxy> {
        self.relationships_with(direction, None)
    }

    pub fn relationships_in(&self, direction: Direction, tx: impl TransactionArg) -> Result<Proxy> {
        self.relationships_with(direction, Some(&tx))
    }

    fn relationships_with(
        &self,
        direction: Direction,
        explicit: Option<&dyn TransactionArg>,
    ) -> Result<Proxy> {
        self.require("relationships", self.kind() == EntityKind::Node)?;
        match self.client.select_transaction(&[self], explicit)? {
            Some(tx) => {
                let suffix = format!("/relationships/{}", direction.as_str());
                tx.record_pending(
                    Recording::new(Method::Get, tx.target_for(self, &suffix)?),
                    EntityKind::Iterable,
                    Seed::default(),
                )
            }
            None => {
                let entity = self.client.relationships_now(&self.url()?, direction)?;
                Ok(Proxy::bound(&self.client, entity))
            }
        }
    }

    // ── Relationships ────────────────────────────────────────────

    /// Start node. Available before commit for relationships created in
    /// the same transaction.
    pub fn start(&self) -> Result<Proxy> {
        self.require("start", self.kind() == EntityKind::Relationship)?;
        if let Some(entry) = self.indexed_entity() {
            return entry.start();
        }
        match self.view()? {
            View::Unbound { job, tx } => tx.origin_of(job),
            View::Bound(entity) => Ok(Proxy::bound(&self.client, ends_of(&entity)?.0.into())),
        }
    }

    /// End node.
    pub fn end(&self) -> Result<Proxy> {
        self.require("end", self.kind() == EntityKind::Relationship)?;
        if let Some(entry) = self.indexed_entity() {
            return entry.end();
        }
        if let ProxyState::Unbound(pending) = &*self.state.borrow() {
            return pending
                .seed
                .end
                .clone()
                .ok_or(GraphError::Unbound { job: pending.job });
        }
        let entity = self.entity()?;
        Ok(Proxy::bound(&self.client, ends_of(&entity)?.1.into()))
    }

    /// Relationship type.
    pub fn rel_type(&self) -> Result<String> {
        self.require("rel_type", self.kind() == EntityKind::Relationship)?;
        if let Some(entry) = self.indexed_entity() {
            return entry.rel_type();
        }
        match self.view()? {
            View::Bound(Entity::Relationship(rel)) => rel.rel_type(),
            View::Bound(other) => Err(GraphError::InvalidCapability {
                capability: "rel_type",
                kind: other.kind(),
            }),
            View::Unbound { job, .. } => match &*self.state.borrow() {
                ProxyState::Unbound(pending) => pending
                    .seed
                    .rel_type
                    .clone()
                    .ok_or(GraphError::Unbound { job }),
                ProxyState::Bound(_) => Err(GraphError::Unbound { job }),
            },
        }
    }

    // ── Indexes ──────────────────────────────────────────────────

    fn entry_kind(&self) -> EntityKind {
        match self.kind() {
            EntityKind::IndexRelationship => EntityKind::Relationship,
            _ => EntityKind::Node,
        }
    }

    /// Add `entity` to this index under `key`/`value`.
    ///
    /// The returned proxy stands for the index entry and answers reads
    /// through `entity` until commit.
    pub fn index_add(&self, key: &str, value: impl Into<Value>, entity: &Proxy) -> Result<Proxy> {
        self.index_add_with(key, value.into(), entity, None)
    }

    pub fn index_add_in(
        &self,
        key: &str,
        value: impl Into<Value>,
        entity: &Proxy,
        tx: impl TransactionArg,
    ) -> Result<Proxy> {
        self.index_add_with(key, value.into(), entity, Some(&tx))
    }

    fn index_add_with(
        &self,
        key: &str,
        value: Value,
        entity: &Proxy,
        explicit: Option<&dyn TransactionArg>,
    ) -> Result<Proxy> {
        self.require("index_add", self.kind().is_index())?;
        let entry_kind = self.entry_kind();
        entity.require("index_add", entity.kind() == entry_kind)?;
        match self.client.select_transaction(&[self, entity], explicit)? {
            Some(tx) => {
                let body = json!({
                    "key": key,
                    "value": value,
                    "uri": tx.reference_for(entity)?,
                });
                tx.record_pending(
                    Recording::new(Method::Post, tx.target_for(self, "")?).body(body),
                    entry_kind,
                    Seed {
                        entry: Some(entity.clone()),
                        ..Default::default()
                    },
                )
            }
            None => {
                let added = self.client.index_add_now(
                    &self.url()?,
                    key,
                    &value,
                    &entity.url()?,
                    entry_kind,
                )?;
                Ok(Proxy::bound(&self.client, added))
            }
        }
    }

    /// Entities indexed under `key`/`value`, as an iterable proxy.
    pub fn index_query(&self, key: &str, value: impl Into<Value>) -> Result<Proxy> {
        self.index_query_with(key, value.into(), None)
    }

    pub fn index_query_in(
        &self,
        key: &str,
        value: impl Into<Value>,
        tx: impl TransactionArg,
    ) -> Result<Proxy> {
        self.index_query_with(key, value.into(), Some(&tx))
    }

    fn index_query_with(
        &self,
        key: &str,
        value: Value,
        explicit: Option<&dyn TransactionArg>,
    ) -> Result<Proxy> {
        self.require("index_query", self.kind().is_index())?;
        match self.client.select_transaction(&[self], explicit)? {
            Some(tx) => {
                let suffix = format!("/{}/{}", encode_segment(key), encode_value(&value));
                tx.record_pending(
                    Recording::new(Method::Get, tx.target_for(self, &suffix)?),
                    EntityKind::Iterable,
                    Seed::default(),
                )
            }
            None => {
                let found = self.client.index_query_now(&self.url()?, key, &value)?;
                Ok(Proxy::bound(&self.client, found))
            }
        }
    }

    /// Remove `entity`'s entry under `key`/`value`. The entity must exist
    /// already, since the route names it by id.
    pub fn index_remove(&self, key: &str, value: impl Into<Value>, entity: &Proxy) -> Result<()> {
        self.index_remove_with(key, value.into(), entity, None)
    }

    pub fn index_remove_in(
        &self,
        key: &str,
        value: impl Into<Value>,
        entity: &Proxy,
        tx: impl TransactionArg,
    ) -> Result<()> {
        self.index_remove_with(key, value.into(), entity, Some(&tx))
    }

    fn index_remove_with(
        &self,
        key: &str,
        value: Value,
        entity: &Proxy,
        explicit: Option<&dyn TransactionArg>,
    ) -> Result<()> {
        self.require("index_remove", self.kind().is_index())?;
        let id = entity_id(&entity.entity()?)?;
        match self.client.select_transaction(&[self], explicit)? {
            Some(tx) => {
                let suffix = format!("/{}/{}/{id}", encode_segment(key), encode_value(&value));
                tx.record(Recording::new(Method::Delete, tx.target_for(self, &suffix)?))?;
            }
            None => self.client.index_remove_now(&self.url()?, key, &value, id)?,
        }
        Ok(())
    }

    // ── Results ──────────────────────────────────────────────────

    /// The value of a bound scalar proxy.
    pub fn value(&self) -> Result<Value> {
        self.require("value", self.kind() == EntityKind::Scalar)?;
        match self.entity()? {
            Entity::Scalar(value) => Ok(value),
            other => Err(GraphError::InvalidCapability {
                capability: "value",
                kind: other.kind(),
            }),
        }
    }

    /// The members of a bound iterable proxy.
    pub fn items(&self) -> Result<Vec<Proxy>> {
        self.require("items", self.kind() == EntityKind::Iterable)?;
        match self.entity()? {
            Entity::Iterable(items) => Ok(items
                .into_iter()
                .map(|entity| Proxy::bound(&self.client, entity))
                .collect()),
            other => Err(GraphError::InvalidCapability {
                capability: "items",
                kind: other.kind(),
            }),
        }
    }
}

fn ends_of(entity: &Entity) -> Result<(Node, Node)> {
    match entity {
        Entity::Relationship(rel) => Ok((rel.start()?, rel.end()?)),
        other => Err(GraphError::InvalidCapability {
            capability: "start",
            kind: other.kind(),
        }),
    }
}

fn entity_id(entity: &Entity) -> Result<u64> {
    let id = match entity {
        Entity::Node(node) => node.id(),
        Entity::Relationship(rel) => rel.id(),
        other => {
            return Err(GraphError::InvalidCapability {
                capability: "index_remove",
                kind: other.kind(),
            })
        }
    };
    id.ok_or_else(|| GraphError::MalformedResponse("entity url has no numeric id".to_string()))
}

/// Index values appear in paths as their plain string form.
pub(crate) fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => encode_segment(s),
        other => encode_segment(&other.to_string()),
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            ProxyState::Unbound(pending) => f
                .debug_struct("Proxy")
                .field("kind", &pending.kind)
                .field("job", &pending.job)
                .field("transaction", &pending.transaction_id)
                .finish(),
            ProxyState::Bound(entity) => f.debug_tuple("Proxy").field(entity).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_values_render_as_plain_strings() {
        assert_eq!(encode_value(&Value::from("alice")), "alice");
        assert_eq!(encode_value(&Value::from(42)), "42");
        assert_eq!(encode_value(&Value::from("a b")), "a%20b");
    }
}
