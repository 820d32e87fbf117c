//! Store access and the shared graph client.

use std::fmt;
use std::rc::Rc;

use arbor_core::remote::reason_phrase;
use arbor_core::{
    ClientConfig, EntityKind, Method, RemoteStore, Request, Response, TransactionOptions,
};
use serde_json::Value;

use crate::context::{TransactionArg, TransactionContext};
use crate::entity::Entity;
use crate::error::{GraphError, Result};
use crate::materialize::{DefaultMaterializer, EntityMaterializer, Payload};
use crate::proxy::Proxy;
use crate::transaction::Transaction;

struct ClientInner {
    store: Rc<dyn RemoteStore>,
    config: ClientConfig,
    context: TransactionContext,
    materializer: Rc<dyn EntityMaterializer>,
}

/// Single point of access to one graph store.
///
/// Clone is cheap (inner Rc) and clones share the transaction context, so
/// a transaction scoped on one clone captures calls made through another.
#[derive(Clone)]
pub struct GraphClient {
    inner: Rc<ClientInner>,
}

impl GraphClient {
    /// Create a client over `store` with the default materializer.
    pub fn new(store: Rc<dyn RemoteStore>, config: ClientConfig) -> Self {
        Self::with_materializer(store, config, Rc::new(DefaultMaterializer))
    }

    pub fn with_materializer(
        store: Rc<dyn RemoteStore>,
        config: ClientConfig,
        materializer: Rc<dyn EntityMaterializer>,
    ) -> Self {
        tracing::info!(base_url = %config.base_url, "Graph client created");
        Self {
            inner: Rc::new(ClientInner {
                store,
                config,
                context: TransactionContext::new(),
                materializer,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &TransactionContext {
        &self.inner.context
    }

    pub fn materializer(&self) -> &dyn EntityMaterializer {
        self.inner.materializer.as_ref()
    }

    // ── Raw Requests ─────────────────────────────────────────────

    /// Send one request; `path` may be relative to the store root or absolute.
    pub(crate) fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response> {
        let mut request = Request::new(method, self.config().url(path));
        request.body = body;
        tracing::debug!(method = %method, url = %request.path, "Sending request");
        let response = self.inner.store.send(&request)?;
        tracing::debug!(status = response.status, url = %request.path, "Received response");
        Ok(response)
    }

    /// Map a non-success response onto the status error taxonomy.
    pub(crate) fn check(&self, path: &str, response: Response) -> Result<Option<Value>> {
        if response.is_success() {
            return Ok(response.body);
        }
        if response.is_not_found() {
            return Err(GraphError::NotFound {
                path: path.to_string(),
            });
        }
        Err(GraphError::Status {
            status: response.status,
            reason: reason_phrase(response.status),
            path: path.to_string(),
        })
    }

    /// Send and check in one go.
    pub(crate) fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        let response = self.send(method, path, body)?;
        self.check(path, response)
    }

    /// Build a handle from a plain response body.
    pub(crate) fn materialize(&self, kind: EntityKind, body: Option<&Value>) -> Result<Entity> {
        self.materializer()
            .materialize(self, kind, &Payload::from_body(body))
    }

    /// Path relative to the store root, as batch entries use it.
    pub(crate) fn relative(&self, url: &str) -> String {
        self.config().relative_path(url)
    }

    // ── Transactions ─────────────────────────────────────────────

    /// Open a transaction with the configured defaults.
    pub fn transaction(&self) -> Transaction {
        self.transaction_with(self.config().transaction_options())
    }

    pub fn transaction_with(&self, options: TransactionOptions) -> Transaction {
        let tx = Transaction::open(self.clone(), options);
        self.context().register(&tx);
        tx
    }

    /// The transaction calls made right now would be recorded into.
    pub fn current_transaction(&self) -> Option<Transaction> {
        self.context().resolve_current_transaction(None)
    }

    /// Run `f` with a fresh transaction scoped as current.
    ///
    /// The scope is released on every exit path. With `auto_commit` the
    /// transaction commits after `f` returns `Ok`; an `Err` from `f` leaves
    /// it uncommitted.
    pub fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        self.in_transaction_with(self.config().transaction_options(), f)
    }

    pub fn in_transaction_with<T, F>(&self, options: TransactionOptions, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let tx = self.transaction_with(options);
        let value = {
            let _scope = self.context().scope(&tx);
            f(&tx)?
        };
        if options.auto_commit && tx.is_open() {
            tx.commit()?;
        }
        Ok(value)
    }

    /// Pick the transaction for a call touching `participants`.
    ///
    /// Unbound participants pin the call to their owning transaction; they
    /// must agree with each other and with an explicit transaction, if one
    /// is given. Otherwise the context resolves `explicit`.
    pub(crate) fn select_transaction(
        &self,
        participants: &[&Proxy],
        explicit: Option<&dyn TransactionArg>,
    ) -> Result<Option<Transaction>> {
        let mut owner = explicit.and_then(|arg| arg.transaction()).cloned();
        let mut pinned = false;
        for proxy in participants {
            let Some(tx) = proxy.owning_transaction()? else {
                continue;
            };
            if let Some(current) = &owner {
                if current.id() != tx.id() {
                    return Err(GraphError::ForeignProxy {
                        job: proxy.job().unwrap_or_default(),
                        owner: tx.id(),
                        other: current.id(),
                    });
                }
            }
            owner = Some(tx);
            pinned = true;
        }
        if pinned {
            return Ok(owner);
        }
        Ok(self.context().resolve_current_transaction(explicit))
    }
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.config().base_url)
            .finish()
    }
}
