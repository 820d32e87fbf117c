//! Arbor Graph: client binding for HTTP/JSON graph stores.
//!
//! Every entity call either executes immediately against the store or, when
//! a transaction is active, is recorded into that transaction's operation
//! log and answered with an unbound [`Proxy`]. Committing sends the whole
//! log as one batch request and binds every proxy to the entity the store
//! created or returned.

pub mod client;
pub mod context;
pub mod entity;
pub mod error;
pub mod log;
pub mod materialize;
pub mod mutations;
pub mod operation;
pub mod proxy;
pub mod queries;
pub mod transaction;

pub use arbor_core::{ClientConfig, EntityKind, JobId, Method, TransactionId, TransactionOptions};
pub use client::GraphClient;
pub use context::{CallArg, TransactionArg, TransactionContext, TransactionScope};
pub use entity::{Entity, Index, Node, Relationship};
pub use error::{GraphError, Result};
pub use log::OperationLog;
pub use materialize::{DefaultMaterializer, EntityMaterializer, Payload};
pub use operation::{Effect, Operation, Recording, Target};
pub use proxy::Proxy;
pub use queries::Direction;
pub use transaction::{Transaction, TransactionState};
