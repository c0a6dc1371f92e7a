//! In-process ambient transactions
//!
//! A small two-phase-commit manager with volatile (in-memory) enlistment.
//! The transaction is "ambient": code finds it through the execution
//! context instead of receiving it as a parameter.
//!
//! # Commit Protocol
//!
//! ```text
//! root scope disposed after complete()
//!   │
//!   ├─ deadline passed? ──────────────► Rollback to all      (Aborted)
//!   │
//!   ├─ Prepare to each participant
//!   │    any force_rollback / no vote ─► Rollback to others  (Aborted)
//!   │
//!   ├─ deadline passed? ──────────────► InDoubt to all       (InDoubt)
//!   │
//!   └─ Commit to each participant                           (Committed)
//!
//! settle: await every done()/failed() acknowledgment,
//!         fire completed handlers once, publish the outcome
//! ```
//!
//! Notification callbacks are synchronous and must not block on async
//! work; participants acknowledge through the [`Enlistment`] they were
//! handed, possibly from a spawned task.

mod enlistment;
mod options;
mod scope;
mod transaction;

pub use enlistment::{Enlistment, EnlistmentNotification, PreparingEnlistment, Vote};
pub use options::{AsyncFlow, IsolationLevel, ScopeOption, TransactionOptions, TransactionStatus};
pub use scope::TransactionScope;
pub use transaction::Transaction;
