//! Recorded operations and their targets.

use std::fmt;

use arbor_core::wire::{parse_placeholder, BatchEntry};
use arbor_core::{EntityKind, JobId, Method};
use serde_json::Value;

use crate::proxy::Proxy;

/// Where a recorded operation is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A concrete path relative to the store root.
    Path(String),
    /// The eventual result of an earlier job in the same batch, plus a sub-path.
    Forward { job: JobId, suffix: String },
}

impl Target {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    pub fn forward(job: JobId, suffix: impl Into<String>) -> Self {
        Self::Forward {
            job,
            suffix: suffix.into(),
        }
    }

    /// Parse a wire string back into a target.
    pub fn parse(wire: &str) -> Self {
        match parse_placeholder(wire) {
            Some((job, suffix)) => Self::forward(job, suffix),
            None => Self::path(wire),
        }
    }

    /// Same target with `suffix` appended.
    pub fn join(&self, suffix: &str) -> Self {
        match self {
            Self::Path(path) => Self::Path(format!("{path}{suffix}")),
            Self::Forward { job, suffix: own } => Self::forward(*job, format!("{own}{suffix}")),
        }
    }

    pub fn forward_job(&self) -> Option<JobId> {
        match self {
            Self::Forward { job, .. } => Some(*job),
            Self::Path(_) => None,
        }
    }

    /// `{N}`, `{N}/<suffix>`, or the concrete path.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Path(path) => path.clone(),
            Self::Forward { job, suffix } => format!("{}{suffix}", job.placeholder()),
        }
    }

    /// Key under which PUT merges are looked up.
    pub(crate) fn merge_key(&self) -> String {
        self.to_wire().trim_end_matches('/').to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// What a successful operation does to the entity that owns it.
///
/// Drives local reconciliation and the post-commit refresh.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Effect {
    #[default]
    None,
    /// The body replaces the owner's whole property map.
    ReplaceProperties,
    /// The body is the new value of one property.
    SetProperty(String),
    RemoveProperty(String),
    DeleteEntity,
}

impl Effect {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Everything needed to append one operation to a log.
#[derive(Debug, Clone)]
pub struct Recording {
    pub method: Method,
    pub target: Target,
    pub body: Option<Value>,
    pub kind: Option<EntityKind>,
    pub owner: Option<Proxy>,
    pub effect: Effect,
}

impl Recording {
    pub fn new(method: Method, target: Target) -> Self {
        Self {
            method,
            target,
            body: None,
            kind: None,
            owner: None,
            effect: Effect::None,
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn owner(mut self, owner: Proxy) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }
}

/// One operation in a transaction's log.
#[derive(Debug, Clone)]
pub struct Operation {
    pub(crate) job_id: JobId,
    pub(crate) method: Method,
    pub(crate) target: Target,
    pub(crate) body: Option<Value>,
    pub(crate) kind: Option<EntityKind>,
    pub(crate) owner: Option<Proxy>,
    pub(crate) effect: Effect,
    pub(crate) needs_binding: bool,
}

impl Operation {
    pub(crate) fn new(job_id: JobId, recording: Recording) -> Self {
        let needs_binding = recording.method.binds_result() && recording.owner.is_some();
        Self {
            job_id,
            method: recording.method,
            target: recording.target,
            body: recording.body,
            kind: recording.kind,
            owner: recording.owner,
            effect: recording.effect,
            needs_binding,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn kind(&self) -> Option<EntityKind> {
        self.kind
    }

    pub fn owner(&self) -> Option<&Proxy> {
        self.owner.as_ref()
    }

    pub fn effect(&self) -> &Effect {
        &self.effect
    }

    /// Whether the owner gets bound to this operation's result on commit.
    pub fn needs_binding(&self) -> bool {
        self.needs_binding
    }

    pub fn to_entry(&self) -> BatchEntry {
        BatchEntry {
            id: self.job_id,
            method: self.method,
            to: self.target.to_wire(),
            body: self.body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_targets_render_as_placeholders() {
        let target = Target::forward(JobId(0), "/relationships");
        assert_eq!(target.to_wire(), "{0}/relationships");
        assert_eq!(Target::forward(JobId(7), "").to_wire(), "{7}");
        assert_eq!(Target::path("/node/3").to_wire(), "/node/3");
    }

    #[test]
    fn parse_round_trips_placeholders() {
        assert_eq!(
            Target::parse("{2}/properties"),
            Target::forward(JobId(2), "/properties")
        );
        assert_eq!(Target::parse("/node/4"), Target::path("/node/4"));
    }

    #[test]
    fn join_appends_suffix() {
        let target = Target::forward(JobId(1), "").join("/properties");
        assert_eq!(target.to_wire(), "{1}/properties");
        assert_eq!(
            Target::path("/node/1").join("/relationships").to_wire(),
            "/node/1/relationships"
        );
    }

    #[test]
    fn only_owned_get_and_post_need_binding() {
        let op = Operation::new(JobId(0), Recording::new(Method::Post, Target::path("/node")));
        // no owner, nothing to bind
        assert!(!op.needs_binding());

        let op = Operation::new(
            JobId(1),
            Recording::new(Method::Put, Target::path("/node/1/properties")),
        );
        assert!(!op.needs_binding());
        assert_eq!(op.to_entry().to, "/node/1/properties");
    }
}
