//! Write operations: root creation and the immediate write calls.
//!
//! Root creation resolves the current transaction and either records a
//! pending entity or creates it right away. The `*_now` helpers are the
//! immediate paths proxies fall back to outside a transaction.

use arbor_core::{EntityKind, Method};
use serde_json::{json, Map, Value};

use crate::client::GraphClient;
use crate::context::TransactionArg;
use crate::entity::Entity;
use crate::error::Result;
use crate::materialize::Payload;
use crate::operation::{Recording, Target};
use crate::proxy::{encode_value, Proxy, Seed};
use crate::queries::encode_segment;

impl GraphClient {
    // ── Root Creation ────────────────────────────────────────────

    /// Create a node, or record its creation in the current transaction.
    pub fn create_node(&self, properties: Map<String, Value>) -> Result<Proxy> {
        self.create_node_with(None, properties)
    }

    /// Record the creation in the transaction `tx` carries, falling back
    /// to the current one.
    pub fn create_node_in(
        &self,
        tx: impl TransactionArg,
        properties: Map<String, Value>,
    ) -> Result<Proxy> {
        self.create_node_with(Some(&tx), properties)
    }

    fn create_node_with(
        &self,
        explicit: Option<&dyn TransactionArg>,
        properties: Map<String, Value>,
    ) -> Result<Proxy> {
        let body = Value::Object(properties.clone());
        match self.context().resolve_current_transaction(explicit) {
            Some(tx) => tx.record_pending(
                Recording::new(Method::Post, Target::path("/node")).body(body),
                EntityKind::Node,
                Seed::properties(properties),
            ),
            None => {
                let created = self.call(Method::Post, "/node", Some(body))?;
                let entity = self.materialize(EntityKind::Node, created.as_ref())?;
                tracing::debug!(url = ?entity.url(), "Node created");
                Ok(Proxy::bound(self, entity))
            }
        }
    }

    pub fn create_node_index(&self, name: &str) -> Result<Proxy> {
        self.create_index_with(None, EntityKind::IndexNode, name)
    }

    pub fn create_relationship_index(&self, name: &str) -> Result<Proxy> {
        self.create_index_with(None, EntityKind::IndexRelationship, name)
    }

    /// Create an index of `kind` (`IndexNode` or `IndexRelationship`) in
    /// the transaction `tx` carries.
    pub fn create_index_in(
        &self,
        tx: impl TransactionArg,
        kind: EntityKind,
        name: &str,
    ) -> Result<Proxy> {
        self.create_index_with(Some(&tx), kind, name)
    }

    fn create_index_with(
        &self,
        explicit: Option<&dyn TransactionArg>,
        kind: EntityKind,
        name: &str,
    ) -> Result<Proxy> {
        let path = index_root(kind);
        let body = json!({ "name": name });
        match self.context().resolve_current_transaction(explicit) {
            Some(tx) => tx.record_pending(
                Recording::new(Method::Post, Target::path(path)).body(body),
                kind,
                Seed::default(),
            ),
            None => {
                let created = self.call(Method::Post, path, Some(body))?;
                let payload = Payload {
                    body: created.as_ref(),
                    location: None,
                    from: Some(path),
                };
                let entity = self.materializer().materialize(self, kind, &payload)?;
                Ok(Proxy::bound(self, entity))
            }
        }
    }

    // ── Immediate Writes ─────────────────────────────────────────

    pub(crate) fn set_property_now(&self, url: &str, key: &str, value: &Value) -> Result<()> {
        let path = format!("{url}/properties/{}", encode_segment(key));
        self.call(Method::Put, &path, Some(value.clone()))?;
        Ok(())
    }

    pub(crate) fn remove_property_now(&self, url: &str, key: &str) -> Result<()> {
        let path = format!("{url}/properties/{}", encode_segment(key));
        self.call(Method::Delete, &path, None)?;
        Ok(())
    }

    pub(crate) fn delete_now(&self, url: &str) -> Result<()> {
        self.call(Method::Delete, url, None)?;
        tracing::debug!(url = %url, "Entity deleted");
        Ok(())
    }

    pub(crate) fn relate_now(
        &self,
        from_url: &str,
        to_url: &str,
        rel_type: &str,
        properties: Map<String, Value>,
    ) -> Result<Entity> {
        let body = json!({
            "to": self.relative(to_url),
            "type": rel_type,
            "data": properties,
        });
        let created = self.call(
            Method::Post,
            &format!("{from_url}/relationships"),
            Some(body),
        )?;
        self.materialize(EntityKind::Relationship, created.as_ref())
    }

    pub(crate) fn index_add_now(
        &self,
        index_url: &str,
        key: &str,
        value: &Value,
        entity_url: &str,
        entry_kind: EntityKind,
    ) -> Result<Entity> {
        let body = json!({
            "key": key,
            "value": value,
            "uri": self.relative(entity_url),
        });
        let added = self.call(Method::Post, index_url, Some(body))?;
        self.materialize(entry_kind, added.as_ref())
    }

    pub(crate) fn index_remove_now(
        &self,
        index_url: &str,
        key: &str,
        value: &Value,
        id: u64,
    ) -> Result<()> {
        let path = format!(
            "{index_url}/{}/{}/{id}",
            encode_segment(key),
            encode_value(value)
        );
        self.call(Method::Delete, &path, None)?;
        Ok(())
    }
}

/// Collection path under which indexes of `kind` live.
pub(crate) fn index_root(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::IndexRelationship => "/index/relationship",
        _ => "/index/node",
    }
}
