//! In-memory graph store.
//!
//! Speaks the REST routes and the batch endpoint against a plain in-memory
//! graph. A batch is all-or-nothing: the first failing entry rolls the
//! graph back and its status becomes the batch status.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use arbor_core::remote::{
    STATUS_BAD_REQUEST, STATUS_CONFLICT, STATUS_CREATED, STATUS_NO_CONTENT, STATUS_NOT_FOUND,
    STATUS_OK, STATUS_SERVER_ERROR,
};
use arbor_core::{BatchEntry, BatchResult, Method, RemoteStore, Request, Response};
use serde_json::{json, Map, Value};

use crate::TEST_BASE_URL;

const BATCH_PATH: &str = "/batch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Family {
    Node,
    Relationship,
}

impl Family {
    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "node" => Some(Self::Node),
            "relationship" => Some(Self::Relationship),
            _ => None,
        }
    }

    fn segment(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Relationship => "relationship",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRelationship {
    start: u64,
    end: u64,
    rel_type: String,
    data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    key: String,
    value: String,
    id: u64,
}

/// Outcome of one routed call, plus the location a batch placeholder
/// referring to it resolves to.
struct Outcome {
    status: u16,
    body: Option<Value>,
    location: Option<String>,
}

impl Outcome {
    fn ok(body: Value) -> Self {
        Self {
            status: STATUS_OK,
            body: Some(body),
            location: None,
        }
    }

    fn found(body: Value, location: String) -> Self {
        Self {
            status: STATUS_OK,
            body: Some(body),
            location: Some(location),
        }
    }

    fn created(body: Value, location: String) -> Self {
        Self {
            status: STATUS_CREATED,
            body: Some(body),
            location: Some(location),
        }
    }

    fn no_content() -> Self {
        Self {
            status: STATUS_NO_CONTENT,
            body: None,
            location: None,
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(json!({ "message": message.into() })),
            location: None,
        }
    }

    fn not_found(what: &str) -> Self {
        Self::error(STATUS_NOT_FOUND, format!("{what} not found"))
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn message(&self) -> String {
        self.body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn into_response(self) -> Response {
        Response::new(self.status, self.body)
    }
}

#[derive(Debug, Clone, Default)]
struct Graph {
    next_node: u64,
    next_relationship: u64,
    nodes: BTreeMap<u64, Map<String, Value>>,
    relationships: BTreeMap<u64, StoredRelationship>,
    indexes: BTreeMap<(Family, String), Vec<IndexEntry>>,
}

impl Graph {
    fn insert_node(&mut self, data: Map<String, Value>) -> u64 {
        self.next_node += 1;
        let id = self.next_node;
        self.nodes.insert(id, data);
        id
    }

    fn insert_relationship(&mut self, relationship: StoredRelationship) -> u64 {
        self.next_relationship += 1;
        let id = self.next_relationship;
        self.relationships.insert(id, relationship);
        id
    }

    fn exists(&self, family: Family, id: u64) -> bool {
        match family {
            Family::Node => self.nodes.contains_key(&id),
            Family::Relationship => self.relationships.contains_key(&id),
        }
    }

    fn properties_mut(&mut self, family: Family, id: u64) -> Option<&mut Map<String, Value>> {
        match family {
            Family::Node => self.nodes.get_mut(&id),
            Family::Relationship => self.relationships.get_mut(&id).map(|r| &mut r.data),
        }
    }

    fn representation(&self, base: &str, family: Family, id: u64) -> Option<Value> {
        match family {
            Family::Node => self.nodes.get(&id).map(|data| {
                json!({
                    "self": entity_url(base, Family::Node, id),
                    "data": data,
                })
            }),
            Family::Relationship => self.relationships.get(&id).map(|rel| {
                json!({
                    "self": entity_url(base, Family::Relationship, id),
                    "start": entity_url(base, Family::Node, rel.start),
                    "end": entity_url(base, Family::Node, rel.end),
                    "type": rel.rel_type,
                    "data": rel.data,
                })
            }),
        }
    }

    // ── Routing ──────────────────────────────────────────────────

    fn route(&mut self, base: &str, method: Method, path: &str, body: Option<Value>) -> Outcome {
        let decoded: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(decode_segment)
            .collect();
        let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();

        match segments.as_slice() {
            ["node"] if method == Method::Post => self.create_node(base, body),
            ["index", family, rest @ ..] => match Family::parse(family) {
                Some(family) => self.route_index(base, method, family, rest, body),
                None => Outcome::not_found(path),
            },
            [family, id, rest @ ..] => match (Family::parse(family), id.parse::<u64>()) {
                (Some(family), Ok(id)) => self.route_entity(base, method, family, id, rest, body),
                _ => Outcome::not_found(path),
            },
            _ => Outcome::not_found(path),
        }
    }

    fn route_entity(
        &mut self,
        base: &str,
        method: Method,
        family: Family,
        id: u64,
        rest: &[&str],
        body: Option<Value>,
    ) -> Outcome {
        let url = entity_url(base, family, id);
        if !self.exists(family, id) {
            return Outcome::not_found(&url);
        }
        match (method, rest) {
            (Method::Get, []) => match self.representation(base, family, id) {
                Some(repr) => Outcome::found(repr, url),
                None => Outcome::not_found(&url),
            },
            (Method::Delete, []) => self.delete_entity(family, id),
            (_, ["properties"]) | (_, ["properties", _]) => {
                let key = rest.get(1).copied();
                self.route_properties(method, family, id, key, body)
            }
            (Method::Post, ["relationships"]) if family == Family::Node => {
                self.create_relationship(base, id, body)
            }
            (Method::Get, ["relationships", direction]) if family == Family::Node => {
                self.list_relationships(base, id, direction)
            }
            _ => Outcome::error(
                STATUS_NOT_FOUND,
                format!("no route {method} {url}/{}", rest.join("/")),
            ),
        }
    }

    fn route_properties(
        &mut self,
        method: Method,
        family: Family,
        id: u64,
        key: Option<&str>,
        body: Option<Value>,
    ) -> Outcome {
        let Some(properties) = self.properties_mut(family, id) else {
            return Outcome::not_found(family.segment());
        };
        match (method, key) {
            (Method::Get, None) => Outcome::ok(Value::Object(properties.clone())),
            (Method::Put, None) => match body {
                Some(Value::Object(map)) => {
                    *properties = map;
                    Outcome::no_content()
                }
                _ => Outcome::error(STATUS_BAD_REQUEST, "properties must be an object"),
            },
            (Method::Delete, None) => {
                properties.clear();
                Outcome::no_content()
            }
            (Method::Get, Some(key)) => match properties.get(key) {
                Some(value) => Outcome::ok(value.clone()),
                None => Outcome::not_found(key),
            },
            (Method::Put, Some(key)) => match body {
                Some(value) if !value.is_null() => {
                    properties.insert(key.to_string(), value);
                    Outcome::no_content()
                }
                _ => Outcome::error(STATUS_BAD_REQUEST, "property value must not be null"),
            },
            (Method::Delete, Some(key)) => match properties.remove(key) {
                Some(_) => Outcome::no_content(),
                None => Outcome::not_found(key),
            },
            (Method::Post, _) => Outcome::error(STATUS_NOT_FOUND, "no POST on properties"),
        }
    }

    fn create_node(&mut self, base: &str, body: Option<Value>) -> Outcome {
        let data = match body {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Outcome::error(STATUS_BAD_REQUEST, "node data must be an object"),
        };
        let id = self.insert_node(data);
        match self.representation(base, Family::Node, id) {
            Some(repr) => Outcome::created(repr, entity_url(base, Family::Node, id)),
            None => Outcome::error(STATUS_SERVER_ERROR, "node vanished"),
        }
    }

    fn delete_entity(&mut self, family: Family, id: u64) -> Outcome {
        if family == Family::Node
            && self
                .relationships
                .values()
                .any(|r| r.start == id || r.end == id)
        {
            return Outcome::error(STATUS_CONFLICT, format!("node {id} still has relationships"));
        }
        match family {
            Family::Node => {
                self.nodes.remove(&id);
            }
            Family::Relationship => {
                self.relationships.remove(&id);
            }
        }
        for ((index_family, _), entries) in self.indexes.iter_mut() {
            if *index_family == family {
                entries.retain(|entry| entry.id != id);
            }
        }
        Outcome::no_content()
    }

    fn create_relationship(&mut self, base: &str, start: u64, body: Option<Value>) -> Outcome {
        let Some(body) = body else {
            return Outcome::error(STATUS_BAD_REQUEST, "missing relationship body");
        };
        let end = body
            .get("to")
            .and_then(Value::as_str)
            .and_then(|to| parse_reference(base, to))
            .filter(|(family, id)| *family == Family::Node && self.nodes.contains_key(id));
        let Some((_, end)) = end else {
            return Outcome::error(STATUS_BAD_REQUEST, "`to` must name an existing node");
        };
        let Some(rel_type) = body.get("type").and_then(Value::as_str) else {
            return Outcome::error(STATUS_BAD_REQUEST, "missing relationship type");
        };
        let data = body
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let id = self.insert_relationship(StoredRelationship {
            start,
            end,
            rel_type: rel_type.to_string(),
            data,
        });
        match self.representation(base, Family::Relationship, id) {
            Some(repr) => Outcome::created(repr, entity_url(base, Family::Relationship, id)),
            None => Outcome::error(STATUS_SERVER_ERROR, "relationship vanished"),
        }
    }

    fn list_relationships(&self, base: &str, node: u64, direction: &str) -> Outcome {
        let selects = |rel: &StoredRelationship| match direction {
            "all" => Some(rel.start == node || rel.end == node),
            "in" => Some(rel.end == node),
            "out" => Some(rel.start == node),
            _ => None,
        };
        let mut listed = Vec::new();
        for (id, rel) in &self.relationships {
            match selects(rel) {
                Some(true) => listed.extend(self.representation(base, Family::Relationship, *id)),
                Some(false) => {}
                None => {
                    return Outcome::error(STATUS_BAD_REQUEST, format!("bad direction {direction}"))
                }
            }
        }
        Outcome::ok(Value::Array(listed))
    }

    // ── Indexes ──────────────────────────────────────────────────

    fn route_index(
        &mut self,
        base: &str,
        method: Method,
        family: Family,
        rest: &[&str],
        body: Option<Value>,
    ) -> Outcome {
        match (method, rest) {
            (Method::Post, []) => {
                let Some(name) = body.as_ref().and_then(|b| b.get("name")).and_then(Value::as_str)
                else {
                    return Outcome::error(STATUS_BAD_REQUEST, "missing index name");
                };
                self.indexes
                    .entry((family, name.to_string()))
                    .or_default();
                let url = index_url(base, family, name);
                Outcome::created(json!({ "template": format!("{url}/{{key}}/{{value}}") }), url)
            }
            (Method::Post, [name]) => self.add_to_index(base, family, name, body),
            (Method::Get, [name, key, value]) => {
                let Some(entries) = self.indexes.get(&(family, name.to_string())) else {
                    return Outcome::not_found(name);
                };
                let found = entries
                    .iter()
                    .filter(|e| e.key == *key && e.value == *value)
                    .filter_map(|e| self.representation(base, family, e.id))
                    .collect();
                Outcome::ok(Value::Array(found))
            }
            (Method::Delete, [name, key, value, id]) => {
                let Ok(id) = id.parse::<u64>() else {
                    return Outcome::error(STATUS_BAD_REQUEST, "entity id must be numeric");
                };
                let Some(entries) = self.indexes.get_mut(&(family, name.to_string())) else {
                    return Outcome::not_found(name);
                };
                let before = entries.len();
                entries.retain(|e| !(e.key == *key && e.value == *value && e.id == id));
                if entries.len() == before {
                    Outcome::not_found("index entry")
                } else {
                    Outcome::no_content()
                }
            }
            _ => Outcome::error(STATUS_NOT_FOUND, "no index route"),
        }
    }

    fn add_to_index(
        &mut self,
        base: &str,
        family: Family,
        name: &str,
        body: Option<Value>,
    ) -> Outcome {
        let Some(body) = body else {
            return Outcome::error(STATUS_BAD_REQUEST, "missing index entry");
        };
        let key = body.get("key").and_then(Value::as_str).map(str::to_string);
        let value = body.get("value").map(plain_string);
        let target = body
            .get("uri")
            .and_then(Value::as_str)
            .and_then(|uri| parse_reference(base, uri));
        let (Some(key), Some(value), Some((target_family, id))) = (key, value, target) else {
            return Outcome::error(STATUS_BAD_REQUEST, "index entry needs key, value and uri");
        };
        if target_family != family || !self.exists(family, id) {
            return Outcome::error(STATUS_BAD_REQUEST, "uri must name an existing entity");
        }
        let Some(entries) = self.indexes.get_mut(&(family, name.to_string())) else {
            return Outcome::not_found(name);
        };
        let entry = IndexEntry { key, value, id };
        if !entries.contains(&entry) {
            entries.push(entry);
        }
        match self.representation(base, family, id) {
            Some(repr) => Outcome::created(repr, entity_url(base, family, id)),
            None => Outcome::not_found(name),
        }
    }
}

fn entity_url(base: &str, family: Family, id: u64) -> String {
    format!("{base}/{}/{id}", family.segment())
}

fn index_url(base: &str, family: Family, name: &str) -> String {
    format!("{base}/index/{}/{name}", family.segment())
}

/// `/node/3`, or a full URL under `base`, into its family and id.
fn parse_reference(base: &str, reference: &str) -> Option<(Family, u64)> {
    let path = reference.strip_prefix(base).unwrap_or(reference);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let family = Family::parse(segments.next()?)?;
    let id = segments.next()?.parse().ok()?;
    match segments.next() {
        None => Some((family, id)),
        Some(_) => None,
    }
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn decode_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let byte = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = byte {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

/// Replace every `{N}` naming a finished job with that job's location.
fn substitute(input: &str, locations: &HashMap<usize, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let resolved = after.find('}').and_then(|close| {
            let job = after[..close].parse::<usize>().ok()?;
            locations.get(&job).map(|location| (location, close))
        });
        match resolved {
            Some((location, close)) => {
                out.push_str(location);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn substitute_value(value: Value, locations: &HashMap<usize, String>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(&s, locations)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| substitute_value(item, locations))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute_value(v, locations)))
                .collect(),
        ),
        other => other,
    }
}

// ── MemoryStore ──────────────────────────────────────────────────

/// In-memory graph store with a request journal and failure injection.
pub struct MemoryStore {
    base_url: String,
    graph: RefCell<Graph>,
    journal: RefCell<Vec<Request>>,
    batch_failure: Cell<Option<u16>>,
    offline: Cell<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_base_url(TEST_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            graph: RefCell::new(Graph::default()),
            journal: RefCell::new(Vec::new()),
            batch_failure: Cell::new(None),
            offline: Cell::new(false),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── Failure Injection ────────────────────────────────────────

    /// Answer every batch with `status` and leave the graph untouched.
    pub fn fail_batches_with(&self, status: u16) {
        self.batch_failure.set(Some(status));
    }

    pub fn clear_batch_failure(&self) {
        self.batch_failure.set(None);
    }

    /// While offline every request fails at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    // ── Journal ──────────────────────────────────────────────────

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.journal.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.journal.borrow().len()
    }

    pub fn clear_requests(&self) {
        self.journal.borrow_mut().clear();
    }

    /// Decoded bodies of every batch request received.
    pub fn batches(&self) -> Vec<Vec<BatchEntry>> {
        self.journal
            .borrow()
            .iter()
            .filter(|r| r.method == Method::Post && self.local_path(&r.path) == BATCH_PATH)
            .filter_map(|r| r.body.clone())
            .filter_map(|body| serde_json::from_value(body).ok())
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches().len()
    }

    // ── Seeding And Inspection ───────────────────────────────────

    pub fn insert_node(&self, data: Value) -> u64 {
        let data = data.as_object().cloned().unwrap_or_default();
        self.graph.borrow_mut().insert_node(data)
    }

    pub fn insert_relationship(&self, start: u64, end: u64, rel_type: &str, data: Value) -> u64 {
        self.graph.borrow_mut().insert_relationship(StoredRelationship {
            start,
            end,
            rel_type: rel_type.to_string(),
            data: data.as_object().cloned().unwrap_or_default(),
        })
    }

    /// Absolute URL of node `id`.
    pub fn node_url(&self, id: u64) -> String {
        entity_url(&self.base_url, Family::Node, id)
    }

    pub fn relationship_url(&self, id: u64) -> String {
        entity_url(&self.base_url, Family::Relationship, id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.borrow().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.borrow().relationships.len()
    }

    pub fn node_properties(&self, id: u64) -> Option<Map<String, Value>> {
        self.graph.borrow().nodes.get(&id).cloned()
    }

    pub fn relationship_properties(&self, id: u64) -> Option<Map<String, Value>> {
        self.graph.borrow().relationships.get(&id).map(|r| r.data.clone())
    }

    /// Start node, end node and type of relationship `id`.
    pub fn relationship_ends(&self, id: u64) -> Option<(u64, u64, String)> {
        self.graph
            .borrow()
            .relationships
            .get(&id)
            .map(|r| (r.start, r.end, r.rel_type.clone()))
    }

    /// Ids indexed under `key`/`value` in the node index `name`.
    pub fn node_index_ids(&self, name: &str, key: &str, value: &str) -> Vec<u64> {
        self.index_ids(Family::Node, name, key, value)
    }

    pub fn relationship_index_ids(&self, name: &str, key: &str, value: &str) -> Vec<u64> {
        self.index_ids(Family::Relationship, name, key, value)
    }

    fn index_ids(&self, family: Family, name: &str, key: &str, value: &str) -> Vec<u64> {
        self.graph
            .borrow()
            .indexes
            .get(&(family, name.to_string()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.key == key && e.value == value)
                    .map(|e| e.id)
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Dispatch ─────────────────────────────────────────────────

    fn local_path(&self, path: &str) -> String {
        match path.strip_prefix(&self.base_url) {
            Some(rest) if rest.is_empty() => "/".to_string(),
            Some(rest) => rest.trim_end_matches('/').to_string(),
            None => path.trim_end_matches('/').to_string(),
        }
    }

    fn batch(&self, body: Option<Value>) -> Outcome {
        let entries: Vec<BatchEntry> = match body.map(serde_json::from_value).transpose() {
            Ok(Some(entries)) => entries,
            Ok(None) => return Outcome::error(STATUS_BAD_REQUEST, "missing batch body"),
            Err(e) => return Outcome::error(STATUS_BAD_REQUEST, format!("bad batch: {e}")),
        };
        if let Some(status) = self.batch_failure.get() {
            tracing::debug!(status, "Injected batch failure");
            return Outcome::error(status, "injected batch failure");
        }

        let mut graph = self.graph.borrow_mut();
        let snapshot = graph.clone();
        let mut locations = HashMap::new();
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            let to = substitute(&entry.to, &locations);
            let body = entry.body.map(|b| substitute_value(b, &locations));
            let outcome = graph.route(&self.base_url, entry.method, &self.local_path(&to), body);
            if !outcome.is_success() {
                *graph = snapshot;
                tracing::debug!(
                    job = %entry.id,
                    status = outcome.status,
                    "Batch entry failed, rolled back"
                );
                return Outcome::error(
                    outcome.status,
                    format!("job {} failed: {}", entry.id, outcome.message()),
                );
            }
            if let Some(location) = &outcome.location {
                locations.insert(entry.id.0, location.clone());
            }
            results.push(BatchResult {
                id: entry.id,
                location: outcome.location,
                body: outcome.body,
                from: Some(entry.to),
            });
        }

        match serde_json::to_value(results) {
            Ok(body) => Outcome::ok(body),
            Err(e) => {
                *graph = snapshot;
                Outcome::error(STATUS_SERVER_ERROR, e.to_string())
            }
        }
    }
}

impl RemoteStore for MemoryStore {
    fn send(&self, request: &Request) -> anyhow::Result<Response> {
        self.journal.borrow_mut().push(request.clone());
        if self.offline.get() {
            return Err(anyhow!("connection refused: {}", request.path));
        }
        let path = self.local_path(&request.path);
        let outcome = if request.method == Method::Post && path == BATCH_PATH {
            self.batch(request.body.clone())
        } else {
            self.graph.borrow_mut().route(
                &self.base_url,
                request.method,
                &path,
                request.body.clone(),
            )
        };
        Ok(outcome.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(store: &MemoryStore, method: Method, path: &str, body: Option<Value>) -> Response {
        let mut request = Request::new(method, path);
        request.body = body;
        store.send(&request).unwrap()
    }

    #[test]
    fn node_crud() {
        let store = MemoryStore::new();
        let created = send(&store, Method::Post, "/node", Some(json!({"name": "a"})));
        assert_eq!(created.status, STATUS_CREATED);
        let url = created.body.unwrap()["self"].as_str().unwrap().to_string();
        assert_eq!(url, store.node_url(1));

        let put = send(&store, Method::Put, &format!("{url}/properties/age"), Some(json!(3)));
        assert_eq!(put.status, STATUS_NO_CONTENT);
        assert_eq!(store.node_properties(1).unwrap()["age"], json!(3));

        let fetched = send(&store, Method::Get, &url, None);
        assert_eq!(fetched.body.unwrap()["data"], json!({"name": "a", "age": 3}));

        assert_eq!(send(&store, Method::Delete, &url, None).status, STATUS_NO_CONTENT);
        assert_eq!(send(&store, Method::Get, &url, None).status, STATUS_NOT_FOUND);
    }

    #[test]
    fn batch_resolves_placeholders() {
        let store = MemoryStore::new();
        let body = json!([
            {"id": 0, "method": "POST", "to": "/node", "body": {}},
            {"id": 1, "method": "POST", "to": "/node", "body": {"n": 2}},
            {"id": 2, "method": "POST", "to": "{0}/relationships",
             "body": {"to": "{1}", "type": "KNOWS"}},
        ]);
        let response = send(&store, Method::Post, "/batch", Some(body));
        assert_eq!(response.status, STATUS_OK);

        let results: Vec<BatchResult> = serde_json::from_value(response.body.unwrap()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[2].from.as_deref(), Some("{0}/relationships"));
        assert_eq!(store.relationship_ends(1), Some((1, 2, "KNOWS".to_string())));
    }

    #[test]
    fn failing_entry_rolls_back_the_batch() {
        let store = MemoryStore::new();
        let body = json!([
            {"id": 0, "method": "POST", "to": "/node", "body": {}},
            {"id": 1, "method": "DELETE", "to": "/node/99"},
        ]);
        let response = send(&store, Method::Post, "/batch", Some(body));
        assert_eq!(response.status, STATUS_NOT_FOUND);
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn injected_failure_and_offline() {
        let store = MemoryStore::new();
        store.fail_batches_with(STATUS_SERVER_ERROR);
        let body = json!([{"id": 0, "method": "POST", "to": "/node", "body": {}}]);
        let response = send(&store, Method::Post, "/batch", Some(body));
        assert_eq!(response.status, STATUS_SERVER_ERROR);
        assert_eq!(store.node_count(), 0);
        assert_eq!(store.batch_count(), 1);

        store.set_offline(true);
        assert!(store.send(&Request::new(Method::Get, "/node/1")).is_err());
        assert_eq!(store.request_count(), 2);
    }

    #[test]
    fn node_with_relationships_cannot_be_deleted() {
        let store = MemoryStore::new();
        let a = store.insert_node(json!({}));
        let b = store.insert_node(json!({}));
        store.insert_relationship(a, b, "KNOWS", json!({}));
        let response = send(&store, Method::Delete, &format!("/node/{a}"), None);
        assert_eq!(response.status, STATUS_CONFLICT);
    }

    #[test]
    fn index_routes() {
        let store = MemoryStore::new();
        let id = store.insert_node(json!({"name": "ann"}));
        let created = send(&store, Method::Post, "/index/node", Some(json!({"name": "people"})));
        assert_eq!(created.status, STATUS_CREATED);

        let entry = json!({"key": "name", "value": "ann lee", "uri": store.node_url(id)});
        let added = send(&store, Method::Post, "/index/node/people", Some(entry));
        assert_eq!(added.status, STATUS_CREATED);
        assert_eq!(store.node_index_ids("people", "name", "ann lee"), vec![id]);

        let found = send(&store, Method::Get, "/index/node/people/name/ann%20lee", None);
        assert_eq!(found.body.unwrap().as_array().unwrap().len(), 1);

        let removed = send(
            &store,
            Method::Delete,
            &format!("/index/node/people/name/ann%20lee/{id}"),
            None,
        );
        assert_eq!(removed.status, STATUS_NO_CONTENT);
        assert!(store.node_index_ids("people", "name", "ann lee").is_empty());
    }

    #[test]
    fn substitution_leaves_unknown_placeholders() {
        let mut locations = HashMap::new();
        locations.insert(0, "http://h/node/5".to_string());
        assert_eq!(substitute("{0}/properties", &locations), "http://h/node/5/properties");
        assert_eq!(substitute("{7}", &locations), "{7}");
        assert_eq!(substitute("{key}/{0}", &locations), "{key}/http://h/node/5");
    }
}
