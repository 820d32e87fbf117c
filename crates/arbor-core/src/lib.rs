//! arbor-core: Shared protocol types, transport abstraction, configuration,
//! and error handling for the arbor graph client.
//!
//! This crate provides the foundations used by the client binding and its
//! test doubles:
//! - HTTP verbs and semantic entity kinds as they appear on the wire
//! - The `RemoteStore` trait that executes one request against the graph store
//! - Client configuration loading
//! - Common error types

pub mod config;
pub mod error;
pub mod remote;
pub mod types;
pub mod wire;

pub use config::{ClientConfig, TransactionOptions};
pub use error::CoreError;
pub use remote::{RemoteStore, Request, Response};
pub use types::{EntityKind, JobId, Method, TransactionId};
pub use wire::{BatchEntry, BatchResult};
