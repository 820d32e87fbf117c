//! Which transaction a call participates in.
//!
//! The context is explicit state owned by the client: a registry of live
//! transactions and a stack of scoped ones. Nothing here is global.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use arbor_core::TransactionId;
use serde_json::Value;

use crate::transaction::{Transaction, TransactionInner};

#[derive(Default)]
struct ContextState {
    active: HashMap<TransactionId, Weak<TransactionInner>>,
    stack: Vec<Transaction>,
}

/// Registry of open transactions plus the scoped "current" stack.
#[derive(Clone, Default)]
pub struct TransactionContext {
    inner: Rc<RefCell<ContextState>>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, tx: &Transaction) {
        let mut state = self.inner.borrow_mut();
        state.active.retain(|_, weak| weak.strong_count() > 0);
        state.active.insert(tx.id(), tx.downgrade());
    }

    pub(crate) fn unregister(&self, id: TransactionId) {
        self.inner.borrow_mut().active.remove(&id);
    }

    /// An open transaction by id.
    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.inner
            .borrow()
            .active
            .get(&id)
            .and_then(Weak::upgrade)
            .map(Transaction::from_inner)
    }

    /// Number of open transactions still alive.
    pub fn active_count(&self) -> usize {
        self.inner
            .borrow()
            .active
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Innermost scoped transaction.
    pub fn current(&self) -> Option<Transaction> {
        self.inner.borrow().stack.last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.inner.borrow().stack.len()
    }

    /// Make `tx` current until the returned guard drops.
    pub fn scope(&self, tx: &Transaction) -> TransactionScope {
        let depth = {
            let mut state = self.inner.borrow_mut();
            state.stack.push(tx.clone());
            state.stack.len()
        };
        tracing::trace!(tx = %tx.id(), depth, "Transaction scope entered");
        TransactionScope {
            context: self.clone(),
            id: tx.id(),
            depth,
        }
    }

    /// Resolve the transaction for a call.
    ///
    /// An explicitly supplied transaction wins; otherwise the innermost
    /// scoped one; otherwise none and the call runs immediately.
    pub fn resolve_current_transaction(
        &self,
        explicit: Option<&dyn TransactionArg>,
    ) -> Option<Transaction> {
        explicit
            .and_then(|arg| arg.transaction())
            .cloned()
            .or_else(|| self.current())
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("TransactionContext")
            .field("active", &state.active.len())
            .field("depth", &state.stack.len())
            .finish()
    }
}

/// Guard returned by [`TransactionContext::scope`].
///
/// Dropping it pops its transaction, along with anything scoped above it
/// that was not released first.
#[must_use = "the transaction is only current while the scope is held"]
pub struct TransactionScope {
    context: TransactionContext,
    id: TransactionId,
    depth: usize,
}

impl TransactionScope {
    pub fn transaction_id(&self) -> TransactionId {
        self.id
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        let popped: Vec<Transaction> = {
            let mut state = self.context.inner.borrow_mut();
            let position = match state.stack.get(self.depth - 1) {
                Some(tx) if tx.id() == self.id => Some(self.depth - 1),
                _ => state.stack.iter().rposition(|tx| tx.id() == self.id),
            };
            match position {
                Some(position) => state.stack.drain(position..).collect(),
                None => Vec::new(),
            }
        };
        if popped.len() > 1 {
            tracing::warn!(
                tx = %self.id,
                released = popped.len() - 1,
                "Scope dropped with nested scopes still open"
            );
        }
        tracing::trace!(tx = %self.id, "Transaction scope exited");
        drop(popped);
    }
}

/// A call argument that may carry a transaction.
pub trait TransactionArg {
    fn transaction(&self) -> Option<&Transaction>;
}

impl TransactionArg for Transaction {
    fn transaction(&self) -> Option<&Transaction> {
        Some(self)
    }
}

/// A value paired with the transaction it belongs to.
impl<T> TransactionArg for (T, Transaction) {
    fn transaction(&self) -> Option<&Transaction> {
        Some(&self.1)
    }
}

impl<A: TransactionArg + ?Sized> TransactionArg for &A {
    fn transaction(&self) -> Option<&Transaction> {
        (**self).transaction()
    }
}

impl<A: TransactionArg> TransactionArg for Option<A> {
    fn transaction(&self) -> Option<&Transaction> {
        self.as_ref().and_then(TransactionArg::transaction)
    }
}

/// One positional argument of a dynamically assembled call.
#[derive(Debug, Clone)]
pub enum CallArg {
    Value(Value),
    Transaction(Transaction),
}

impl TransactionArg for CallArg {
    fn transaction(&self) -> Option<&Transaction> {
        match self {
            Self::Transaction(tx) => Some(tx),
            Self::Value(_) => None,
        }
    }
}

/// Only a transaction in the last position counts.
impl TransactionArg for Vec<CallArg> {
    fn transaction(&self) -> Option<&Transaction> {
        self.last().and_then(TransactionArg::transaction)
    }
}

impl<const N: usize> TransactionArg for [CallArg; N] {
    fn transaction(&self) -> Option<&Transaction> {
        self.last().and_then(TransactionArg::transaction)
    }
}
