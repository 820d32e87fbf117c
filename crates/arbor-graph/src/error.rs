//! Error types for the arbor-graph crate.

use arbor_core::remote::STATUS_NOT_FOUND;
use arbor_core::{EntityKind, JobId, TransactionId};
use thiserror::Error;

/// Errors from graph operations.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Connection-level failure reported by the transport, passed through as is.
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("Unexpected status {status} ({reason}) from {path}")]
    Status {
        status: u16,
        reason: &'static str,
        path: String,
    },

    #[error("Resource not found: {path}")]
    NotFound { path: String },

    /// The batch call behind a commit failed as a whole.
    #[error("Transaction {id} failed: batch returned {status} ({reason})")]
    Transaction {
        id: TransactionId,
        status: u16,
        reason: &'static str,
    },

    #[error("`{capability}` is not available on a {kind} handle")]
    InvalidCapability {
        capability: &'static str,
        kind: EntityKind,
    },

    #[error("Handle for job {job} is not bound to an entity yet")]
    Unbound { job: JobId },

    #[error("Handle for job {job} belongs to transaction {owner}, not {other}")]
    ForeignProxy {
        job: JobId,
        owner: TransactionId,
        other: TransactionId,
    },

    #[error("Transaction {0} is spent and cannot record or commit again")]
    TransactionSpent(TransactionId),

    #[error("The transaction owning job {job} was dropped before commit")]
    TransactionDropped { job: JobId },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Numeric HTTP status for status-carrying errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } | Self::Transaction { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(STATUS_NOT_FOUND),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
