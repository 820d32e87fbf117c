//! Protocol-level types shared by the client binding and the store doubles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// ── HTTP Verbs ────────────────────────────────────────────────────

/// The HTTP verbs the graph store protocol uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether a batched operation with this verb returns a body whose
    /// identity gets bound to a handle after commit.
    pub fn binds_result(&self) -> bool {
        matches!(self, Self::Get | Self::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(CoreError::InvalidMethod(s.to_string())),
        }
    }
}

// ── Entity Kinds ──────────────────────────────────────────────────

/// Semantic tag describing what an operation's result materializes into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Node,
    Relationship,
    IndexNode,
    IndexRelationship,
    Iterable,
    Scalar,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "NODE",
            Self::Relationship => "RELATIONSHIP",
            Self::IndexNode => "INDEX_NODE",
            Self::IndexRelationship => "INDEX_RELATIONSHIP",
            Self::Iterable => "ITERABLE",
            Self::Scalar => "SCALAR",
        }
    }

    /// Nodes and relationships carry properties and can be deleted.
    pub fn is_property_container(&self) -> bool {
        matches!(self, Self::Node | Self::Relationship)
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Self::IndexNode | Self::IndexRelationship)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NODE" => Ok(Self::Node),
            "RELATIONSHIP" => Ok(Self::Relationship),
            "INDEX_NODE" => Ok(Self::IndexNode),
            "INDEX_RELATIONSHIP" => Ok(Self::IndexRelationship),
            "ITERABLE" => Ok(Self::Iterable),
            "SCALAR" => Ok(Self::Scalar),
            _ => Err(CoreError::InvalidKind(s.to_string())),
        }
    }
}

// ── Identifiers ───────────────────────────────────────────────────

/// Position of an operation inside one transaction's log.
///
/// Assigned at append time and never reassigned; doubles as the batch
/// entry `id` on the wire.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct JobId(pub usize);

impl JobId {
    /// The batch placeholder standing for this job's eventual result.
    pub fn placeholder(&self) -> String {
        format!("{{{}}}", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_serializes_uppercase() {
        let json = serde_json::to_string(&Method::Delete).unwrap();
        assert_eq!(json, "\"DELETE\"");
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert!("PATCH".parse::<Method>().is_err());
    }

    #[test]
    fn only_get_and_post_bind_results() {
        assert!(Method::Get.binds_result());
        assert!(Method::Post.binds_result());
        assert!(!Method::Put.binds_result());
        assert!(!Method::Delete.binds_result());
    }

    #[test]
    fn entity_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&EntityKind::IndexRelationship).unwrap();
        assert_eq!(json, "\"INDEX_RELATIONSHIP\"");
        assert_eq!("index_node".parse::<EntityKind>().unwrap(), EntityKind::IndexNode);
    }

    #[test]
    fn job_placeholder_format() {
        assert_eq!(JobId(0).placeholder(), "{0}");
        assert_eq!(JobId(12).placeholder(), "{12}");
        assert_eq!(serde_json::to_string(&JobId(3)).unwrap(), "3");
    }
}
