//! Concrete handles for entities that exist in the store.
//!
//! Clones of a handle share one cached state, so a refresh or tombstone
//! through any clone is visible through all of them.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use arbor_core::{EntityKind, Method};
use serde_json::{Map, Value};

use crate::client::GraphClient;
use crate::error::{GraphError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct RelationshipEnds {
    rel_type: String,
    start: String,
    end: String,
}

#[derive(Debug)]
struct EntityState {
    url: String,
    properties: Map<String, Value>,
    /// False for handles created from a bare URL; the first read fetches.
    loaded: bool,
    /// False once the entity is known to be deleted.
    present: bool,
    ends: Option<RelationshipEnds>,
}

#[derive(Clone)]
struct EntityHandle {
    client: GraphClient,
    state: Rc<RefCell<EntityState>>,
}

impl EntityHandle {
    fn new(client: GraphClient, url: String, properties: Option<Map<String, Value>>) -> Self {
        let loaded = properties.is_some();
        Self {
            client,
            state: Rc::new(RefCell::new(EntityState {
                url,
                properties: properties.unwrap_or_default(),
                loaded,
                present: true,
                ends: None,
            })),
        }
    }

    fn from_representation(client: &GraphClient, repr: &Value) -> Result<Self> {
        let url = repr
            .get("self")
            .and_then(Value::as_str)
            .ok_or_else(|| GraphError::MalformedResponse(format!("missing `self` in {repr}")))?;
        let handle = Self::new(client.clone(), url.to_string(), None);
        handle.apply_representation(repr);
        Ok(handle)
    }

    fn url(&self) -> String {
        self.state.borrow().url.clone()
    }

    fn is_present(&self) -> bool {
        self.state.borrow().present
    }

    fn ensure_loaded(&self) -> Result<()> {
        let needs_load = {
            let state = self.state.borrow();
            !state.loaded && state.present
        };
        if needs_load {
            self.refresh()?;
        }
        Ok(())
    }

    fn properties(&self) -> Result<Map<String, Value>> {
        self.ensure_loaded()?;
        Ok(self.state.borrow().properties.clone())
    }

    /// The cached map, or `None` when it has never been loaded.
    fn cached_properties(&self) -> Option<Map<String, Value>> {
        let state = self.state.borrow();
        state.loaded.then(|| state.properties.clone())
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_loaded()?;
        Ok(self.state.borrow().properties.get(key).cloned())
    }

    /// Re-read from the store. A 404 tombstones instead of failing.
    fn refresh(&self) -> Result<()> {
        let url = self.url();
        let response = self.client.send(Method::Get, &url, None)?;
        if response.is_not_found() {
            tracing::debug!(url = %url, "Entity gone, tombstoning");
            self.tombstone();
            return Ok(());
        }
        let body = self.client.check(&url, response)?;
        let repr = body.ok_or_else(|| {
            GraphError::MalformedResponse(format!("empty representation for {url}"))
        })?;
        self.apply_representation(&repr);
        Ok(())
    }

    fn apply_representation(&self, repr: &Value) {
        let mut state = self.state.borrow_mut();
        state.properties = repr
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let field = |name: &str| repr.get(name).and_then(Value::as_str).map(str::to_string);
        let ends = (field("type"), field("start"), field("end"));
        if let (Some(rel_type), Some(start), Some(end)) = ends {
            state.ends = Some(RelationshipEnds {
                rel_type,
                start,
                end,
            });
        }
        state.loaded = true;
        state.present = true;
    }

    fn tombstone(&self) {
        let mut state = self.state.borrow_mut();
        state.properties.clear();
        state.loaded = true;
        state.present = false;
    }

    fn replace_properties(&self, properties: Map<String, Value>) {
        let mut state = self.state.borrow_mut();
        state.properties = properties;
        state.loaded = true;
    }

    fn set_cached(&self, key: &str, value: Value) {
        self.state.borrow_mut().properties.insert(key.to_string(), value);
    }

    fn remove_cached(&self, key: &str) {
        self.state.borrow_mut().properties.remove(key);
    }

    fn ends(&self) -> Result<RelationshipEnds> {
        self.ensure_loaded()?;
        let state = self.state.borrow();
        state.ends.clone().ok_or_else(|| {
            GraphError::MalformedResponse(format!("{} has no start/end/type", state.url))
        })
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Entity")
            .field("url", &state.url)
            .field("present", &state.present)
            .field("properties", &state.properties)
            .finish()
    }
}

/// Numeric id at the end of an entity URL.
fn trailing_id(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

// ── Node ─────────────────────────────────────────────────────────

/// A node that exists in the store.
#[derive(Clone, Debug)]
pub struct Node(EntityHandle);

impl Node {
    /// Build from a `{self, data}` representation.
    pub fn from_representation(client: &GraphClient, repr: &Value) -> Result<Self> {
        EntityHandle::from_representation(client, repr).map(Self)
    }

    /// A handle on `url` whose properties are fetched on first read.
    pub fn detached(client: &GraphClient, url: impl Into<String>) -> Self {
        Self(EntityHandle::new(client.clone(), url.into(), None))
    }

    pub fn url(&self) -> String {
        self.0.url()
    }

    pub fn id(&self) -> Option<u64> {
        trailing_id(&self.url())
    }

    pub fn properties(&self) -> Result<Map<String, Value>> {
        self.0.properties()
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.0.get(key)
    }

    pub fn refresh(&self) -> Result<()> {
        self.0.refresh()
    }

    /// False once the node has been deleted.
    pub fn is_present(&self) -> bool {
        self.0.is_present()
    }

    pub fn client(&self) -> &GraphClient {
        &self.0.client
    }
}

// ── Relationship ─────────────────────────────────────────────────

/// A relationship that exists in the store.
#[derive(Clone, Debug)]
pub struct Relationship(EntityHandle);

impl Relationship {
    /// Build from a `{self, start, end, type, data}` representation.
    pub fn from_representation(client: &GraphClient, repr: &Value) -> Result<Self> {
        EntityHandle::from_representation(client, repr).map(Self)
    }

    pub fn detached(client: &GraphClient, url: impl Into<String>) -> Self {
        Self(EntityHandle::new(client.clone(), url.into(), None))
    }

    pub fn url(&self) -> String {
        self.0.url()
    }

    pub fn id(&self) -> Option<u64> {
        trailing_id(&self.url())
    }

    pub fn properties(&self) -> Result<Map<String, Value>> {
        self.0.properties()
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.0.get(key)
    }

    pub fn refresh(&self) -> Result<()> {
        self.0.refresh()
    }

    pub fn is_present(&self) -> bool {
        self.0.is_present()
    }

    pub fn rel_type(&self) -> Result<String> {
        Ok(self.0.ends()?.rel_type)
    }

    /// The start node, fetched lazily.
    pub fn start(&self) -> Result<Node> {
        Ok(Node::detached(&self.0.client, self.0.ends()?.start))
    }

    /// The end node, fetched lazily.
    pub fn end(&self) -> Result<Node> {
        Ok(Node::detached(&self.0.client, self.0.ends()?.end))
    }

    pub fn client(&self) -> &GraphClient {
        &self.0.client
    }
}

// ── Index ────────────────────────────────────────────────────────

/// A named node or relationship index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    kind: EntityKind,
    name: String,
    url: String,
}

impl Index {
    pub fn new(kind: EntityKind, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            url: url.into(),
        }
    }

    /// `IndexNode` or `IndexRelationship`.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Kind of the entities this index holds.
    pub fn entry_kind(&self) -> EntityKind {
        match self.kind {
            EntityKind::IndexRelationship => EntityKind::Relationship,
            _ => EntityKind::Node,
        }
    }
}

// ── Entity ───────────────────────────────────────────────────────

/// Anything a store call can produce.
#[derive(Clone, Debug)]
pub enum Entity {
    Node(Node),
    Relationship(Relationship),
    Index(Index),
    Iterable(Vec<Entity>),
    Scalar(Value),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Node(_) => EntityKind::Node,
            Self::Relationship(_) => EntityKind::Relationship,
            Self::Index(index) => index.kind(),
            Self::Iterable(_) => EntityKind::Iterable,
            Self::Scalar(_) => EntityKind::Scalar,
        }
    }

    /// Identity URL, for kinds that have one.
    pub fn url(&self) -> Option<String> {
        match self {
            Self::Node(node) => Some(node.url()),
            Self::Relationship(rel) => Some(rel.url()),
            Self::Index(index) => Some(index.url().to_string()),
            Self::Iterable(_) | Self::Scalar(_) => None,
        }
    }

    pub fn is_present(&self) -> bool {
        match self {
            Self::Node(node) => node.is_present(),
            Self::Relationship(rel) => rel.is_present(),
            _ => true,
        }
    }

    /// Same identity URL, or equal values for scalars.
    pub fn same_as(&self, other: &Entity) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Iterable(a), Self::Iterable(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            _ => match (self.url(), other.url()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn handle(&self) -> Option<&EntityHandle> {
        match self {
            Self::Node(node) => Some(&node.0),
            Self::Relationship(rel) => Some(&rel.0),
            _ => None,
        }
    }

    pub(crate) fn properties(&self) -> Result<Map<String, Value>> {
        self.container("properties")?.properties()
    }

    pub(crate) fn get(&self, key: &str) -> Result<Option<Value>> {
        self.container("get")?.get(key)
    }

    /// Properties as cached, without touching the store.
    pub(crate) fn cached_properties(&self) -> Option<Map<String, Value>> {
        self.handle().and_then(EntityHandle::cached_properties)
    }

    /// Re-read nodes and relationships; other kinds have nothing to refresh.
    pub fn refresh(&self) -> Result<()> {
        match self.handle() {
            Some(handle) => handle.refresh(),
            None => Ok(()),
        }
    }

    pub(crate) fn tombstone(&self) {
        if let Some(handle) = self.handle() {
            handle.tombstone();
        }
    }

    pub(crate) fn replace_properties(&self, properties: Map<String, Value>) {
        if let Some(handle) = self.handle() {
            handle.replace_properties(properties);
        }
    }

    pub(crate) fn set_cached(&self, key: &str, value: Value) {
        if let Some(handle) = self.handle() {
            handle.set_cached(key, value);
        }
    }

    pub(crate) fn remove_cached(&self, key: &str) {
        if let Some(handle) = self.handle() {
            handle.remove_cached(key);
        }
    }

    fn container(&self, capability: &'static str) -> Result<&EntityHandle> {
        self.handle().ok_or(GraphError::InvalidCapability {
            capability,
            kind: self.kind(),
        })
    }
}

impl From<Node> for Entity {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<Relationship> for Entity {
    fn from(rel: Relationship) -> Self {
        Self::Relationship(rel)
    }
}

impl From<Index> for Entity {
    fn from(index: Index) -> Self {
        Self::Index(index)
    }
}
