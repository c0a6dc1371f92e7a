//! Transaction scopes
//!
//! A scope votes on the outcome of its transaction when it is disposed. The
//! scope that created the transaction (the root) drives the commit protocol;
//! dependent scopes can only veto by being disposed without completing.

use super::options::{AsyncFlow, ScopeOption, TransactionOptions, TransactionStatus};
use super::transaction::Transaction;
use crate::error::AmbientError;
use crate::execution;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Region of code whose work belongs to one ambient transaction
///
/// ```ignore
/// let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
/// scope.run(async { /* Transaction::current() is Some */ }).await;
/// scope.complete();
/// scope.finish().await?;
/// ```
pub struct TransactionScope {
    transaction: Option<Transaction>,
    root: bool,
    async_flow: AsyncFlow,
    completed: AtomicBool,
    disposed: AtomicBool,
}

impl TransactionScope {
    /// Create a scope
    ///
    /// `Required` joins the transaction visible in the current execution
    /// frame, creating one if there is none.
    pub fn new(option: ScopeOption, options: TransactionOptions, async_flow: AsyncFlow) -> Self {
        let (transaction, root) = match option {
            ScopeOption::Required => match Transaction::current() {
                Some(current) => (Some(current), false),
                None => (Some(Transaction::begin(&options)), true),
            },
            ScopeOption::RequiresNew => (Some(Transaction::begin(&options)), true),
            ScopeOption::Suppress => (None, false),
        };
        debug!(
            transaction_id = ?transaction.as_ref().map(Transaction::id),
            ?option,
            root,
            "transaction scope opened"
        );
        TransactionScope {
            transaction,
            root,
            async_flow,
            completed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// `Required` scope with default options
    pub fn with_async_flow(async_flow: AsyncFlow) -> Self {
        Self::new(ScopeOption::Required, TransactionOptions::default(), async_flow)
    }

    /// Dependent scope over an existing transaction
    pub fn bound_to(transaction: Transaction, async_flow: AsyncFlow) -> Self {
        TransactionScope {
            transaction: Some(transaction),
            root: false,
            async_flow,
            completed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Transaction of this scope, None for a suppressing scope
    pub fn transaction(&self) -> Option<Transaction> {
        self.transaction.clone()
    }

    /// Whether this scope created its transaction
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Async-flow option the scope was created with
    pub fn async_flow(&self) -> AsyncFlow {
        self.async_flow
    }

    /// Whether [`complete`](Self::complete) was called
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether the scope has been disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Run `fut` with this scope's transaction as the ambient transaction
    ///
    /// With [`AsyncFlow::Suppressed`] the future sees no ambient
    /// transaction at all.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        let ambient = match self.async_flow {
            AsyncFlow::Enabled => self.transaction.clone(),
            AsyncFlow::Suppressed => None,
        };
        execution::with_ambient(ambient, fut).await
    }

    /// Vote to commit
    pub fn complete(&self) {
        if self.is_disposed() {
            warn!(
                transaction_id = ?self.transaction.as_ref().map(Transaction::id),
                "complete called on a disposed transaction scope"
            );
            return;
        }
        self.completed.store(true, Ordering::Release);
    }

    /// Cast this scope's vote
    ///
    /// Idempotent. A completed root scope commits its transaction, an
    /// uncompleted scope rolls it back, a completed dependent scope leaves
    /// the decision to the root.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(transaction) = &self.transaction else {
            return;
        };
        match (self.root, self.is_completed()) {
            (true, true) => transaction.commit(),
            (_, false) => {
                debug!(
                    transaction_id = %transaction.id(),
                    root = self.root,
                    "transaction scope disposed without completing"
                );
                transaction.rollback();
            }
            (false, true) => {}
        }
    }

    /// Dispose, then wait for the outcome if this scope decided it
    ///
    /// Returns `None` when the scope carries no transaction or the outcome
    /// is still up to the root scope.
    pub async fn finish(&self) -> Result<Option<TransactionStatus>, AmbientError> {
        self.dispose();
        let Some(transaction) = &self.transaction else {
            return Ok(None);
        };
        if self.root || !self.is_completed() {
            transaction.outcome().await.map(Some)
        } else {
            Ok(None)
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("transaction", &self.transaction.as_ref().map(Transaction::id))
            .field("root", &self.root)
            .field("async_flow", &self.async_flow)
            .field("completed", &self.is_completed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
