//! Error types for transaction contexts and ambient transactions

use crate::ambient::TransactionStatus;
use crate::context::ContextStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by [`TransactionContext`](crate::TransactionContext)
#[derive(Debug, Error)]
pub enum ContextError {
    /// The context already left the Active state
    #[error("transaction context {context_id} is not active ({status:?})")]
    NotActive {
        /// Context that rejected the call
        context_id: Uuid,
        /// Status at the time of the call
        status: ContextStatus,
    },

    /// The context has been disposed
    #[error("transaction context {context_id} has been disposed")]
    Disposed {
        /// Context that rejected the call
        context_id: Uuid,
    },

    /// A commit hook failed; later hooks were not run
    #[error("commit hook #{index} of transaction context {context_id} failed: {reason}")]
    HookFailed {
        /// Context being completed
        context_id: Uuid,
        /// Position of the failing hook in registration order
        index: usize,
        /// Rendered error chain of the hook
        reason: String,
    },
}

/// Errors raised by the ambient transaction manager
#[derive(Debug, Clone, Error)]
pub enum AmbientError {
    /// The transaction no longer accepts enlistments
    #[error("ambient transaction {transaction_id} is not active ({status:?})")]
    NotActive {
        /// Transaction that rejected the call
        transaction_id: Uuid,
        /// Status at the time of the call
        status: TransactionStatus,
    },

    /// A participant with the same resource manager id is already enlisted
    #[error("resource manager {resource_manager_id} is already enlisted in ambient transaction {transaction_id}")]
    DuplicateEnlistment {
        /// Transaction that rejected the call
        transaction_id: Uuid,
        /// Resource manager that was enlisted twice
        resource_manager_id: Uuid,
    },

    /// One or more participants reported failure during phase two
    #[error("ambient transaction {transaction_id} settled with failed enlistments: {}", .failures.join("; "))]
    EnlistmentFailed {
        /// Settled transaction
        transaction_id: Uuid,
        /// One entry per failed participant
        failures: Vec<String>,
    },

    /// The outcome channel closed before an outcome was published
    #[error("ambient transaction {transaction_id} was dropped before its outcome was published")]
    Abandoned {
        /// Transaction whose outcome was lost
        transaction_id: Uuid,
    },
}
