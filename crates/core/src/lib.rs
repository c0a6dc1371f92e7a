//! Core types for ambientbus
//!
//! This crate provides the pieces every other crate builds on:
//! - TransactionContext: the unit of work for one message, with ordered
//!   commit and dispose hooks
//! - Ambient transactions: an in-process two-phase-commit manager with
//!   volatile enlistment ([`ambient`])
//! - Execution context: task-local frames carrying the current ambient
//!   transaction and the current transaction context ([`execution`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ambient;
pub mod context;
pub mod error;
pub mod execution;

pub use ambient::{
    AsyncFlow, Enlistment, EnlistmentNotification, IsolationLevel, PreparingEnlistment,
    ScopeOption, Transaction, TransactionOptions, TransactionScope, TransactionStatus, Vote,
};
pub use context::{ContextStatus, Disposition, TransactionContext};
pub use error::{AmbientError, ContextError};
pub use execution::ContextSlot;
