//! Options for ambient transactions and scopes

use std::time::Duration;

/// Default transaction timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Isolation level requested for a transaction
///
/// The in-process manager records the level and hands it to participants;
/// it does not enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Volatile data can be read but not modified
    Serializable,
    /// Volatile data can be read but not modified during the transaction
    RepeatableRead,
    /// Volatile data cannot be read during the transaction
    #[default]
    ReadCommitted,
    /// Volatile data can be read and modified
    ReadUncommitted,
    /// Reads see a snapshot taken at the start of the transaction
    Snapshot,
    /// Pending changes from more highly isolated transactions are not overwritten
    Chaos,
    /// Left to the participants
    Unspecified,
}

/// Options a new transaction is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Requested isolation level
    pub isolation_level: IsolationLevel,
    /// Time after which the transaction can no longer commit
    pub timeout: Duration,
}

impl TransactionOptions {
    /// Default options: ReadCommitted, 60 seconds
    pub fn new() -> Self {
        TransactionOptions {
            isolation_level: IsolationLevel::ReadCommitted,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the isolation level
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Set the timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// How a new scope relates to the ambient transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeOption {
    /// Join the ambient transaction, or create one if there is none
    #[default]
    Required,
    /// Always create a new transaction
    RequiresNew,
    /// Run without a transaction
    Suppress,
}

/// Whether the scope's transaction flows into the code it runs
///
/// With `Suppressed`, code inside [`TransactionScope::run`] sees no
/// ambient transaction.
///
/// [`TransactionScope::run`]: super::TransactionScope::run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsyncFlow {
    /// The transaction is visible across `.await` points
    #[default]
    Enabled,
    /// The transaction is not carried into async code
    Suppressed,
}

/// Status of an ambient transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Running, accepts enlistments
    Active,
    /// Committed
    Committed,
    /// Rolled back
    Aborted,
    /// Outcome unknown to the participants
    InDoubt,
}
