//! Transaction context for message processing
//!
//! A TransactionContext is the unit of work for one message. Collaborators
//! attach work to it instead of performing it immediately:
//! - commit hooks (async, fallible) run once when the message is judged
//!   successfully processed
//! - dispose hooks (sync) run exactly once at teardown, whatever the outcome
//!
//! ## Lifecycle
//!
//! ```text
//! Active ──complete()──► Completing ──all hooks ok──► Committed
//!   │                        │
//!   │                        └──hook failed──► Aborted
//!   └──abort() / dispose()──────────────────► Aborted
//!
//! dispose(): runs dispose hooks once, last, in every state
//! ```
//!
//! Commit hooks always run strictly before dispose hooks. Dropping the last
//! handle of a context that was never disposed disposes it.

use crate::ambient::Transaction;
use crate::error::ContextError;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Future returned by a commit hook
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type CommitHook = Box<dyn FnOnce() -> HookFuture + Send>;
type DisposeHook = Box<dyn FnOnce(Disposition) + Send>;

/// Status of a transaction context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    /// Accepting hooks, not yet completed
    Active,
    /// Commit hooks are running
    Completing,
    /// All commit hooks succeeded
    Committed,
    /// Aborted explicitly, by a failed commit hook, or disposed uncompleted
    Aborted,
}

/// Outcome handed to dispose hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The context committed before it was disposed
    Committed,
    /// The context was disposed without committing
    RolledBack,
}

struct State {
    status: ContextStatus,
    disposed: bool,
    ambient: Option<Transaction>,
    on_commit: Vec<CommitHook>,
    on_dispose: Vec<DisposeHook>,
}

struct Inner {
    id: Uuid,
    state: Mutex<State>,
}

impl Inner {
    fn take_dispose_hooks(state: &mut State) -> Option<(Vec<DisposeHook>, Disposition)> {
        if state.disposed {
            return None;
        }
        state.disposed = true;
        state.on_commit.clear();
        state.ambient = None;
        if state.status == ContextStatus::Active {
            state.status = ContextStatus::Aborted;
        }
        let disposition = match state.status {
            ContextStatus::Committed => Disposition::Committed,
            _ => Disposition::RolledBack,
        };
        Some((std::mem::take(&mut state.on_dispose), disposition))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some((hooks, disposition)) = Inner::take_dispose_hooks(self.state.get_mut()) {
            if !hooks.is_empty() {
                debug!(context_id = %self.id, "transaction context dropped without dispose");
            }
            for hook in hooks {
                hook(disposition);
            }
        }
    }
}

/// Unit of work for one message
///
/// Cloning is cheap; every clone refers to the same unit of work.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<Inner>,
}

impl TransactionContext {
    /// Create a new active context
    pub fn new() -> Self {
        TransactionContext {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                state: Mutex::new(State {
                    status: ContextStatus::Active,
                    disposed: false,
                    ambient: None,
                    on_commit: Vec::new(),
                    on_dispose: Vec::new(),
                }),
            }),
        }
    }

    /// Unique id of this context
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current status
    pub fn status(&self) -> ContextStatus {
        self.inner.state.lock().status
    }

    /// Whether dispose hooks have already run
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// Whether both handles refer to the same unit of work
    pub fn same_as(&self, other: &TransactionContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Ambient transaction stashed on this context, if any
    pub fn ambient_transaction(&self) -> Option<Transaction> {
        self.inner.state.lock().ambient.clone()
    }

    /// Stash an ambient transaction on this context
    ///
    /// Returns the previously stashed transaction.
    pub fn set_ambient_transaction(&self, transaction: Option<Transaction>) -> Option<Transaction> {
        let mut state = self.inner.state.lock();
        std::mem::replace(&mut state.ambient, transaction)
    }

    /// Register a hook to run when the context completes
    ///
    /// Hooks run sequentially in registration order. Registration is only
    /// accepted while the context is Active.
    pub fn on_commit<F, Fut>(&self, hook: F) -> Result<(), ContextError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(ContextError::Disposed {
                context_id: self.inner.id,
            });
        }
        if state.status != ContextStatus::Active {
            return Err(ContextError::NotActive {
                context_id: self.inner.id,
                status: state.status,
            });
        }
        state.on_commit.push(Box::new(move || Box::pin(hook())));
        Ok(())
    }

    /// Register a hook to run when the context is disposed
    pub fn on_dispose<F>(&self, hook: F) -> Result<(), ContextError>
    where
        F: FnOnce(Disposition) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.disposed {
            return Err(ContextError::Disposed {
                context_id: self.inner.id,
            });
        }
        state.on_dispose.push(Box::new(hook));
        Ok(())
    }

    /// Run the commit hooks
    ///
    /// Succeeds at most once. The first failing hook aborts the context and
    /// the remaining hooks are skipped.
    pub async fn complete(&self) -> Result<(), ContextError> {
        let hooks = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return Err(ContextError::Disposed {
                    context_id: self.inner.id,
                });
            }
            if state.status != ContextStatus::Active {
                return Err(ContextError::NotActive {
                    context_id: self.inner.id,
                    status: state.status,
                });
            }
            state.status = ContextStatus::Completing;
            std::mem::take(&mut state.on_commit)
        };

        let total = hooks.len();
        for (index, hook) in hooks.into_iter().enumerate() {
            if let Err(e) = hook().await {
                self.inner.state.lock().status = ContextStatus::Aborted;
                warn!(
                    context_id = %self.inner.id,
                    hook = index,
                    error = %format!("{:#}", e),
                    "commit hook failed, transaction context aborted"
                );
                return Err(ContextError::HookFailed {
                    context_id: self.inner.id,
                    index,
                    reason: format!("{:#}", e),
                });
            }
        }

        let mut state = self.inner.state.lock();
        if state.status == ContextStatus::Completing {
            state.status = ContextStatus::Committed;
        }
        debug!(context_id = %self.inner.id, hooks = total, "transaction context committed");
        Ok(())
    }

    /// Abort the context, discarding pending commit hooks
    ///
    /// Returns false if the context had already left the Active state.
    pub fn abort(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != ContextStatus::Active {
            return false;
        }
        state.status = ContextStatus::Aborted;
        state.on_commit.clear();
        true
    }

    /// Run the dispose hooks
    ///
    /// Idempotent: hooks run on the first call only. Disposing an Active
    /// context aborts it.
    pub fn dispose(&self) {
        let taken = {
            let mut state = self.inner.state.lock();
            Inner::take_dispose_hooks(&mut state)
        };
        if let Some((hooks, disposition)) = taken {
            debug!(context_id = %self.inner.id, ?disposition, "disposing transaction context");
            for hook in hooks {
                hook(disposition);
            }
        }
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TransactionContext")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("disposed", &state.disposed)
            .field("commit_hooks", &state.on_commit.len())
            .field("dispose_hooks", &state.on_dispose.len())
            .finish()
    }
}
