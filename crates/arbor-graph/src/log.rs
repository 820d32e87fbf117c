//! Ordered, append-only operation log of one transaction.

use std::collections::HashMap;

use arbor_core::wire::BatchEntry;
use arbor_core::{JobId, Method};
use serde_json::{Map, Value};

use crate::operation::{Effect, Operation, Recording, Target};

/// Operations recorded by one transaction, in send order.
///
/// Job ids are positions in the log. Repeated `PUT`s to the same target
/// collapse into one operation whose body is the field-wise merge.
#[derive(Debug, Default)]
pub struct OperationLog {
    operations: Vec<Operation>,
    /// Normalized target → the PUT that later PUTs to it merge into.
    merge_slots: HashMap<String, JobId>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The id the next appended operation will get.
    pub fn next_job_id(&self) -> JobId {
        JobId(self.operations.len())
    }

    /// Append an operation, or merge it into an earlier PUT to the same target.
    ///
    /// Returns the job id the recording ended up under.
    pub fn record(&mut self, recording: Recording) -> JobId {
        let job = self.next_job_id();
        if recording.method == Method::Put {
            let key = recording.target.merge_key();
            if let Some(&existing_job) = self.merge_slots.get(&key) {
                let existing = &mut self.operations[existing_job.0];
                merge_body(&mut existing.body, recording.body);
                tracing::trace!(job = %existing_job, target = %existing.target, "Merged PUT");
                return existing_job;
            }
            self.merge_slots.insert(key, job);
        }

        let operation = Operation::new(job, recording);
        tracing::trace!(
            job = %job,
            method = %operation.method,
            target = %operation.target,
            "Recorded operation"
        );
        self.operations.push(operation);
        job
    }

    /// Body of the pending PUT to `target` that later PUTs merge into.
    pub fn pending_body(&self, target: &Target) -> Option<Map<String, Value>> {
        let job = self.merge_slots.get(&target.merge_key())?;
        match self.operations[job.0].body.as_ref() {
            Some(Value::Object(map)) => Some(map.clone()),
            _ => None,
        }
    }

    /// Stop merging into the pending PUT to `target` and return its body.
    ///
    /// A PUT recorded afterwards opens a new slot, so it lands after
    /// anything recorded in between.
    pub fn close_merge_slot(&mut self, target: &Target) -> Option<Map<String, Value>> {
        let job = self.merge_slots.remove(&target.merge_key())?;
        match self.operations[job.0].body.as_ref() {
            Some(Value::Object(map)) => Some(map.clone()),
            _ => None,
        }
    }

    /// Single-property writes recorded below `properties`, in log order.
    /// A `None` value is a removal.
    pub fn key_writes(&self, properties: &Target) -> Vec<(String, Option<Value>)> {
        let prefix = format!("{}/", properties.merge_key());
        self.operations
            .iter()
            .filter(|op| op.target.merge_key().starts_with(&prefix))
            .filter_map(|op| match &op.effect {
                Effect::SetProperty(key) => Some((key.clone(), op.body.clone())),
                Effect::RemoveProperty(key) => Some((key.clone(), None)),
                _ => None,
            })
            .collect()
    }

    pub fn operation(&self, job: JobId) -> Option<&Operation> {
        self.operations.get(job.0)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Operations whose owner is bound to their result on commit.
    pub fn pending_references(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.needs_binding)
    }

    /// Serialize in job-id order.
    pub fn to_batch(&self) -> Vec<BatchEntry> {
        self.operations.iter().map(Operation::to_entry).collect()
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.merge_slots.clear();
    }
}

/// Field-wise merge; new values override. Non-object bodies are replaced.
fn merge_body(existing: &mut Option<Value>, incoming: Option<Value>) {
    let Some(incoming) = incoming else {
        return;
    };
    match (existing.as_mut(), incoming) {
        (Some(Value::Object(current)), Value::Object(update)) => {
            for (k, v) in update {
                current.insert(k, v);
            }
        }
        (_, incoming) => *existing = Some(incoming),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put(target: Target, body: Value) -> Recording {
        Recording::new(Method::Put, target).body(body)
    }

    #[test]
    fn job_ids_follow_append_order() {
        let mut log = OperationLog::new();
        let a = log.record(Recording::new(Method::Post, Target::path("/node")).body(json!({})));
        let b = log.record(Recording::new(Method::Get, Target::path("/node/1")));
        let c = log.record(Recording::new(Method::Delete, Target::path("/node/2")));

        assert_eq!((a, b, c), (JobId(0), JobId(1), JobId(2)));
        let ids: Vec<_> = log.to_batch().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![JobId(0), JobId(1), JobId(2)]);
    }

    #[test]
    fn puts_to_the_same_target_merge() {
        let mut log = OperationLog::new();
        log.record(Recording::new(Method::Post, Target::path("/node")));
        let target = Target::forward(JobId(0), "/properties");

        let first = log.record(put(target.clone(), json!({"a": 1})));
        let second = log.record(put(target.clone(), json!({"b": 2})));
        let third = log.record(put(target, json!({"a": 3})));

        assert_eq!(first, JobId(1));
        assert_eq!(second, first);
        assert_eq!(third, first);
        assert_eq!(log.len(), 2);
        assert_eq!(log.to_batch()[1].body, Some(json!({"a": 3, "b": 2})));
    }

    #[test]
    fn puts_to_different_targets_do_not_merge() {
        let mut log = OperationLog::new();
        log.record(put(Target::path("/node/1/properties"), json!({"a": 1})));
        log.record(put(Target::path("/node/2/properties"), json!({"a": 1})));
        log.record(put(Target::path("/node/1/properties/"), json!({"b": 1})));

        assert_eq!(log.len(), 2);
        assert_eq!(log.to_batch()[0].body, Some(json!({"a": 1, "b": 1})));
    }

    #[test]
    fn non_put_methods_never_merge() {
        let mut log = OperationLog::new();
        log.record(Recording::new(Method::Delete, Target::path("/node/1")));
        log.record(Recording::new(Method::Delete, Target::path("/node/1")));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn closed_slot_starts_a_new_put() {
        let mut log = OperationLog::new();
        let target = Target::path("/node/1/properties");
        log.record(put(target.clone(), json!({"a": 1, "b": 2})));
        assert_eq!(log.pending_body(&target).map(Value::Object), Some(json!({"a": 1, "b": 2})));
        let pending = log.close_merge_slot(&target).unwrap();
        assert_eq!(Value::Object(pending), json!({"a": 1, "b": 2}));
        assert!(log.pending_body(&target).is_none());

        log.record(Recording::new(Method::Delete, Target::path("/node/1")));
        let later = log.record(put(target.clone(), json!({"b": 2})));
        let merged = log.record(put(target.clone(), json!({"c": 3})));

        assert_eq!(later, JobId(2));
        assert_eq!(merged, later);
        assert_eq!(log.to_batch()[2].body, Some(json!({"b": 2, "c": 3})));
        assert!(log.close_merge_slot(&Target::path("/node/9/properties")).is_none());
    }

    #[test]
    fn key_writes_replay_in_order() {
        let mut log = OperationLog::new();
        let properties = Target::path("/node/1/properties");
        log.record(
            put(properties.join("/a"), json!(1)).effect(Effect::SetProperty("a".to_string())),
        );
        log.record(
            Recording::new(Method::Delete, properties.join("/b"))
                .effect(Effect::RemoveProperty("b".to_string())),
        );
        log.record(put(Target::path("/node/2/properties/a"), json!(9)));
        log.record(
            put(properties.join("/a"), json!(2)).effect(Effect::SetProperty("a".to_string())),
        );

        assert_eq!(log.len(), 3);
        assert_eq!(
            log.key_writes(&properties),
            vec![("a".to_string(), Some(json!(2))), ("b".to_string(), None)]
        );
    }

    #[test]
    fn clear_empties_log_and_slots() {
        let mut log = OperationLog::new();
        let target = Target::path("/node/1/properties");
        log.record(put(target.clone(), json!({"a": 1})));
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.record(put(target, json!({"a": 2}))), JobId(0));
    }
}
