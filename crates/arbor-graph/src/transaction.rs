//! Deferred batch transactions.
//!
//! A transaction records operations instead of executing them. Commit sends
//! the whole log as one batch request, then binds every pending proxy to
//! the entity the store produced for it.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use arbor_core::remote::reason_phrase;
use arbor_core::wire::{BatchEntry, BatchResult};
use arbor_core::{EntityKind, JobId, Method, TransactionId, TransactionOptions};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::client::GraphClient;
use crate::context::TransactionScope;
use crate::entity::{Entity, Node};
use crate::error::{GraphError, Result};
use crate::log::OperationLog;
use crate::materialize::{classify, Payload};
use crate::operation::{Effect, Recording, Target};
use crate::proxy::{Proxy, Seed};
use crate::queries::encode_segment;

/// Lifecycle of a transaction. Only `Open` accepts recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    /// The batch call failed; the log is kept for inspection.
    Failed,
}

pub(crate) struct TransactionInner {
    id: TransactionId,
    client: GraphClient,
    options: TransactionOptions,
    opened_at: DateTime<Utc>,
    state: Cell<TransactionState>,
    log: RefCell<OperationLog>,
    captured: Cell<Option<JobId>>,
    value: RefCell<Option<Entity>>,
}

/// A single-use batch of recorded operations.
///
/// Clone is cheap and clones refer to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Rc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn open(client: GraphClient, options: TransactionOptions) -> Self {
        let tx = Self {
            inner: Rc::new(TransactionInner {
                id: TransactionId::new(),
                client,
                options,
                opened_at: Utc::now(),
                state: Cell::new(TransactionState::Open),
                log: RefCell::new(OperationLog::new()),
                captured: Cell::new(None),
                value: RefCell::new(None),
            }),
        };
        tracing::debug!(
            tx = %tx.id(),
            auto_commit = options.auto_commit,
            auto_update = options.auto_update,
            "Transaction opened"
        );
        tx
    }

    pub(crate) fn from_inner(inner: Rc<TransactionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<TransactionInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn state(&self) -> TransactionState {
        self.inner.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    pub fn options(&self) -> TransactionOptions {
        self.inner.options
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.inner.opened_at
    }

    pub fn client(&self) -> &GraphClient {
        &self.inner.client
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.inner.log.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.log.borrow().is_empty()
    }

    /// The batch this transaction would send right now.
    pub fn entries(&self) -> Vec<BatchEntry> {
        self.inner.log.borrow().to_batch()
    }

    /// Number of proxies waiting to be bound by commit.
    pub fn pending_count(&self) -> usize {
        self.inner.log.borrow().pending_references().count()
    }

    /// Make this the context's current transaction until the guard drops.
    pub fn enter(&self) -> TransactionScope {
        self.client().context().scope(self)
    }

    // ── Root Operations ──────────────────────────────────────────

    /// Record the creation of a node.
    pub fn create_node(&self, properties: Map<String, Value>) -> Result<Proxy> {
        self.client().create_node_in(self, properties)
    }

    /// Record a fetch of node `id`.
    pub fn node(&self, id: u64) -> Result<Proxy> {
        self.client().node_in(self, id)
    }

    /// Record a fetch of relationship `id`.
    pub fn relationship(&self, id: u64) -> Result<Proxy> {
        self.client().relationship_in(self, id)
    }

    pub fn create_node_index(&self, name: &str) -> Result<Proxy> {
        self.client()
            .create_index_in(self, EntityKind::IndexNode, name)
    }

    pub fn create_relationship_index(&self, name: &str) -> Result<Proxy> {
        self.client()
            .create_index_in(self, EntityKind::IndexRelationship, name)
    }

    // ── Captured Value ───────────────────────────────────────────

    /// Keep the result of `proxy`'s operation as this transaction's value.
    pub fn capture(&self, proxy: &Proxy) -> Result<()> {
        self.ensure_open()?;
        let job = self.job_of(proxy)?;
        self.inner.captured.set(Some(job));
        Ok(())
    }

    /// The captured entity, available after a successful commit.
    pub fn value(&self) -> Option<Entity> {
        self.inner.value.borrow().clone()
    }

    // ── Recording ────────────────────────────────────────────────

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(GraphError::TransactionSpent(self.id()))
        }
    }

    fn job_of(&self, proxy: &Proxy) -> Result<JobId> {
        match (proxy.job(), proxy.transaction_id()) {
            (Some(job), Some(owner)) if owner == self.id() => Ok(job),
            (Some(job), Some(owner)) => Err(GraphError::ForeignProxy {
                job,
                owner,
                other: self.id(),
            }),
            _ => Err(GraphError::InvalidCapability {
                capability: "capture",
                kind: proxy.kind(),
            }),
        }
    }

    /// Append (or merge) an operation.
    pub(crate) fn record(&self, recording: Recording) -> Result<JobId> {
        self.ensure_open()?;
        let job = self.inner.log.borrow_mut().record(recording);
        Ok(job)
    }

    /// Append an operation whose result a new unbound proxy stands for.
    pub(crate) fn record_pending(
        &self,
        recording: Recording,
        kind: EntityKind,
        seed: Seed,
    ) -> Result<Proxy> {
        self.ensure_open()?;
        let mut log = self.inner.log.borrow_mut();
        let job = log.next_job_id();
        let proxy = Proxy::unbound(self, kind, job, seed);
        let recorded = log.record(recording.kind(kind).owner(proxy.clone()));
        debug_assert_eq!(recorded, job);
        tracing::debug!(tx = %self.id(), job = %job, kind = %kind, "Recorded pending entity");
        Ok(proxy)
    }

    /// Record setting `key` on `subject`.
    ///
    /// With a known property map (the pending PUT, else `base`) this is a
    /// whole-map PUT that later writes merge into. With no map, as for a
    /// handle that was never loaded, it is a single-property PUT, so
    /// nothing is read from the store while recording.
    pub(crate) fn record_property(
        &self,
        subject: &Proxy,
        base: Option<Map<String, Value>>,
        key: &str,
        value: Value,
    ) -> Result<JobId> {
        self.ensure_open()?;
        let target = self.target_for(subject, "/properties")?;
        let mut log = self.inner.log.borrow_mut();
        let known = log
            .pending_body(&target)
            .or_else(|| with_key_writes(&log, &target, base));
        let recording = match known {
            Some(mut properties) => {
                properties.insert(key.to_string(), value);
                Recording::new(Method::Put, target)
                    .body(Value::Object(properties))
                    .effect(Effect::ReplaceProperties)
            }
            None => Recording::new(Method::Put, target.join(&key_suffix(key)))
                .body(value)
                .effect(Effect::SetProperty(key.to_string())),
        };
        Ok(log.record(recording.owner(subject.clone())))
    }

    /// Record removing `key` from `subject`.
    ///
    /// Closes the merge slot first so the removal cannot be undone by
    /// merging an earlier write into it.
    pub(crate) fn record_removal(
        &self,
        subject: &Proxy,
        base: Option<Map<String, Value>>,
        key: &str,
    ) -> Result<JobId> {
        self.ensure_open()?;
        let target = self.target_for(subject, "/properties")?;
        let mut log = self.inner.log.borrow_mut();
        let known = log
            .close_merge_slot(&target)
            .or_else(|| with_key_writes(&log, &target, base));
        let recording = match known {
            Some(mut properties) => {
                properties.remove(key);
                Recording::new(Method::Put, target)
                    .body(Value::Object(properties))
                    .effect(Effect::ReplaceProperties)
            }
            None => {
                let key_target = target.join(&key_suffix(key));
                log.close_merge_slot(&key_target);
                Recording::new(Method::Delete, key_target)
                    .effect(Effect::RemoveProperty(key.to_string()))
            }
        };
        Ok(log.record(recording.owner(subject.clone())))
    }

    /// Where an operation on `subject` goes: its concrete path, or a
    /// forward reference when it is still pending in this transaction.
    pub(crate) fn target_for(&self, subject: &Proxy, suffix: &str) -> Result<Target> {
        if let (Some(job), Some(owner)) = (subject.job(), subject.transaction_id()) {
            if owner != self.id() {
                return Err(GraphError::ForeignProxy {
                    job,
                    owner,
                    other: self.id(),
                });
            }
            return Ok(Target::forward(job, suffix));
        }
        let url = subject.url()?;
        Ok(Target::path(format!("{}{suffix}", self.client().relative(&url))))
    }

    /// A body value referring to `subject`.
    pub(crate) fn reference_for(&self, subject: &Proxy) -> Result<String> {
        Ok(self.target_for(subject, "")?.to_wire())
    }

    /// The node a pending relationship starts from, derived from the
    /// `POST <node>/relationships` that creates it.
    ///
    /// A fetched relationship has no known start until commit.
    pub(crate) fn origin_of(&self, job: JobId) -> Result<Proxy> {
        let log = self.inner.log.borrow();
        let op = log
            .operation(job)
            .ok_or(GraphError::TransactionSpent(self.id()))?;
        if op.method() != Method::Post {
            return Err(GraphError::Unbound { job });
        }
        match op.target() {
            Target::Forward { job: origin, suffix } if suffix == "/relationships" => log
                .operation(*origin)
                .and_then(|origin_op| origin_op.owner().cloned())
                .ok_or(GraphError::Unbound { job: *origin }),
            Target::Path(path) => match path.strip_suffix("/relationships") {
                Some(node_path) => {
                    let url = self.client().config().url(node_path);
                    let node = Node::detached(self.client(), url);
                    Ok(Proxy::bound(self.client(), node.into()))
                }
                None => Err(GraphError::Unbound { job }),
            },
            Target::Forward { .. } => Err(GraphError::Unbound { job }),
        }
    }

    // ── Commit ───────────────────────────────────────────────────

    /// Execute every recorded operation in one batch request.
    ///
    /// On failure nothing is bound and the log is left as it was; either
    /// way the transaction cannot be committed again.
    pub fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        let id = self.id();
        let client = self.client().clone();
        let entries = self.entries();

        if entries.is_empty() {
            tracing::debug!(tx = %id, "Empty transaction committed without a request");
            self.finish(TransactionState::Committed);
            return Ok(());
        }

        let started = Utc::now();
        tracing::debug!(tx = %id, operations = entries.len(), "Submitting batch");
        let body = serde_json::to_value(&entries)?;
        let batch_path = client.config().batch_path.clone();

        let response = match client.send(Method::Post, &batch_path, Some(body)) {
            Ok(response) => response,
            Err(e) => {
                self.finish(TransactionState::Failed);
                return Err(e);
            }
        };

        if !response.is_success() {
            tracing::warn!(tx = %id, status = response.status, "Batch rejected");
            self.finish(TransactionState::Failed);
            return Err(GraphError::Transaction {
                id,
                status: response.status,
                reason: reason_phrase(response.status),
            });
        }

        let results = match parse_results(response.body) {
            Ok(results) => results,
            Err(e) => {
                self.finish(TransactionState::Failed);
                return Err(e);
            }
        };

        if let Err(e) = self.bind_results(&results) {
            self.finish(TransactionState::Failed);
            return Err(e);
        }
        let stale = self.apply_effects();
        self.capture_value();

        self.inner.log.borrow_mut().clear();
        self.finish(TransactionState::Committed);

        let elapsed_ms = (Utc::now() - started).num_milliseconds();
        tracing::info!(tx = %id, operations = entries.len(), elapsed_ms, "Transaction committed");

        if self.options().auto_update {
            for entity in stale.iter().filter(|e| e.is_present()) {
                entity.refresh()?;
            }
            tracing::debug!(tx = %id, refreshed = stale.len(), "Mutated entities refreshed");
        }
        Ok(())
    }

    fn finish(&self, state: TransactionState) {
        self.inner.state.set(state);
        self.client().context().unregister(self.id());
    }

    /// Materialize every pending result first, then bind them all, so a
    /// bad result leaves every proxy unbound.
    fn bind_results(&self, results: &HashMap<JobId, BatchResult>) -> Result<()> {
        let client = self.client();
        let log = self.inner.log.borrow();
        let mut bindings = Vec::new();
        for op in log.pending_references() {
            let result = results.get(&op.job_id()).ok_or_else(|| {
                GraphError::MalformedResponse(format!("no result for job {}", op.job_id()))
            })?;
            let payload = Payload::from_result(result);
            let kind = op.kind().unwrap_or_else(|| classify(&payload));
            let entity = client.materializer().materialize(client, kind, &payload)?;
            if let Some(owner) = op.owner() {
                bindings.push((owner.clone(), entity));
            }
        }
        drop(log);

        for (proxy, entity) in bindings {
            proxy.bind(entity);
        }
        Ok(())
    }

    /// Reflect confirmed writes and deletes onto the owning handles and
    /// return the entities that were mutation targets.
    fn apply_effects(&self) -> Vec<Entity> {
        let log = self.inner.log.borrow();
        let mut seen = HashSet::new();
        let mut mutated = Vec::new();
        for op in log.operations() {
            let Some(entity) = op.owner().and_then(|owner| owner.entity().ok()) else {
                continue;
            };
            match op.effect() {
                Effect::None => continue,
                Effect::ReplaceProperties => {
                    if let Some(Value::Object(properties)) = op.body() {
                        entity.replace_properties(properties.clone());
                    }
                }
                Effect::SetProperty(key) => {
                    if let Some(value) = op.body() {
                        entity.set_cached(key, value.clone());
                    }
                }
                Effect::RemoveProperty(key) => entity.remove_cached(key),
                Effect::DeleteEntity => entity.tombstone(),
            }
            if let Some(url) = entity.url() {
                if seen.insert(url) {
                    mutated.push(entity);
                }
            }
        }
        mutated
    }

    fn capture_value(&self) {
        let Some(job) = self.inner.captured.get() else {
            return;
        };
        let log = self.inner.log.borrow();
        let entity = log
            .operation(job)
            .and_then(|op| op.owner())
            .and_then(|owner| owner.entity().ok());
        *self.inner.value.borrow_mut() = entity;
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("operations", &self.len())
            .finish()
    }
}

/// `base` with the single-property writes already recorded under
/// `properties` replayed onto it.
fn with_key_writes(
    log: &OperationLog,
    properties: &Target,
    base: Option<Map<String, Value>>,
) -> Option<Map<String, Value>> {
    let mut base = base?;
    for (key, value) in log.key_writes(properties) {
        match value {
            Some(value) => base.insert(key, value),
            None => base.remove(&key),
        };
    }
    Some(base)
}

fn key_suffix(key: &str) -> String {
    format!("/{}", encode_segment(key))
}

/// Index batch results by job id; response order is not significant.
fn parse_results(body: Option<Value>) -> Result<HashMap<JobId, BatchResult>> {
    let body = body.unwrap_or(Value::Array(Vec::new()));
    let results: Vec<BatchResult> = serde_json::from_value(body)
        .map_err(|e| GraphError::MalformedResponse(format!("batch results: {e}")))?;
    Ok(results.into_iter().map(|r| (r.id, r)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn results_are_indexed_by_id() {
        let body = json!([
            {"id": 1, "body": "second"},
            {"id": 0, "location": "http://localhost:7474/db/data/node/4"},
        ]);
        let results = parse_results(Some(body)).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[&JobId(1)].body, Some(json!("second")));
        assert!(results[&JobId(0)].location.is_some());
    }

    #[test]
    fn malformed_results_are_rejected() {
        let err = parse_results(Some(json!({"id": 0}))).unwrap_err();
        assert!(matches!(err, GraphError::MalformedResponse(_)));
    }
}
