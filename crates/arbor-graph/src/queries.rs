//! Read operations: entity lookup, index handles and the immediate reads.

use arbor_core::{EntityKind, Method};
use serde_json::Value;

use crate::client::GraphClient;
use crate::context::TransactionArg;
use crate::entity::{Entity, Index};
use crate::error::Result;
use crate::mutations::index_root;
use crate::operation::{Recording, Target};
use crate::proxy::{encode_value, Proxy, Seed};

/// Which relationships of a node to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    All,
    Incoming,
    Outgoing,
}

impl Direction {
    /// Path segment the store uses for this direction.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Incoming => "in",
            Self::Outgoing => "out",
        }
    }
}

impl GraphClient {
    // ── Lookup ───────────────────────────────────────────────────

    /// Fetch node `id`, or record the fetch in the current transaction.
    pub fn node(&self, id: u64) -> Result<Proxy> {
        self.fetch_with(None, EntityKind::Node, &format!("/node/{id}"))
    }

    /// Fetch relationship `id`, or record the fetch in the current transaction.
    pub fn relationship(&self, id: u64) -> Result<Proxy> {
        self.fetch_with(None, EntityKind::Relationship, &format!("/relationship/{id}"))
    }

    pub fn node_in(&self, tx: impl TransactionArg, id: u64) -> Result<Proxy> {
        self.fetch_with(Some(&tx), EntityKind::Node, &format!("/node/{id}"))
    }

    pub fn relationship_in(&self, tx: impl TransactionArg, id: u64) -> Result<Proxy> {
        let path = format!("/relationship/{id}");
        self.fetch_with(Some(&tx), EntityKind::Relationship, &path)
    }

    fn fetch_with(
        &self,
        explicit: Option<&dyn TransactionArg>,
        kind: EntityKind,
        path: &str,
    ) -> Result<Proxy> {
        match self.context().resolve_current_transaction(explicit) {
            Some(tx) => tx.record_pending(
                Recording::new(Method::Get, Target::path(path)),
                kind,
                Seed::default(),
            ),
            None => {
                let body = self.call(Method::Get, path, None)?;
                let entity = self.materialize(kind, body.as_ref())?;
                Ok(Proxy::bound(self, entity))
            }
        }
    }

    /// Handle on an existing node index. No request is made.
    pub fn node_index(&self, name: &str) -> Proxy {
        self.index_handle(EntityKind::IndexNode, name)
    }

    /// Handle on an existing relationship index. No request is made.
    pub fn relationship_index(&self, name: &str) -> Proxy {
        self.index_handle(EntityKind::IndexRelationship, name)
    }

    fn index_handle(&self, kind: EntityKind, name: &str) -> Proxy {
        let path = format!("{}/{}", index_root(kind), encode_segment(name));
        let index = Index::new(kind, name, self.config().url(&path));
        Proxy::bound(self, index.into())
    }

    // ── Immediate Reads ──────────────────────────────────────────

    pub(crate) fn relationships_now(&self, url: &str, direction: Direction) -> Result<Entity> {
        let path = format!("{url}/relationships/{}", direction.as_str());
        let body = self.call(Method::Get, &path, None)?;
        self.materialize(EntityKind::Iterable, body.as_ref())
    }

    pub(crate) fn property_now(&self, url: &str, key: &str) -> Result<Entity> {
        let path = format!("{url}/properties/{}", encode_segment(key));
        let body = self.call(Method::Get, &path, None)?;
        self.materialize(EntityKind::Scalar, body.as_ref())
    }

    pub(crate) fn index_query_now(
        &self,
        index_url: &str,
        key: &str,
        value: &Value,
    ) -> Result<Entity> {
        let path = format!("{index_url}/{}/{}", encode_segment(key), encode_value(value));
        let body = self.call(Method::Get, &path, None)?;
        self.materialize(EntityKind::Iterable, body.as_ref())
    }
}

/// Percent-encode one path segment, leaving unreserved characters as is.
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_segments() {
        assert_eq!(Direction::All.as_str(), "all");
        assert_eq!(Direction::Incoming.as_str(), "in");
        assert_eq!(Direction::Outgoing.as_str(), "out");
        assert_eq!(Direction::default(), Direction::All);
    }

    #[test]
    fn segments_are_percent_encoded() {
        assert_eq!(encode_segment("name"), "name");
        assert_eq!(encode_segment("first name"), "first%20name");
        assert_eq!(encode_segment("a/b"), "a%2Fb");
        assert_eq!(encode_segment("ü"), "%C3%BC");
    }
}
