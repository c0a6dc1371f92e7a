//! Ambient transaction scopes for ambientbus
//!
//! Two ways to tie message processing to an ambient transaction:
//!
//! - Handling: [`TransactionScopeConfigurationExt::handle_messages_inside_transaction_scope`]
//!   decorates the transport so every receive opens a transaction scope,
//!   and injects a pipeline step that makes that transaction ambient again
//!   while the handlers run. The scope commits only if the message is
//!   processed successfully.
//! - Sending: [`EnlistBus::enlist_bus`] starts a bus transaction inside an
//!   application-owned scope. Messages sent in it leave only when the
//!   ambient transaction commits.
//!
//! ```text
//! worker ── receive ──► TransactionScopeTransportDecorator
//!                         scope = Required, stashed on the context
//!        ── pipeline ──► … deserialize ► transaction-scope ► dispatch
//!                                          bound_to(stashed)
//!        ── complete ──► scope.complete()
//!        ── dispose ───► scope.dispose() → commit / rollback
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod decorator;
pub mod enlist;
pub mod error;
pub mod step;

pub use bridge::{AmbientTransactionBridge, BridgeState, BUS_RESOURCE_MANAGER_ID};
pub use config::{StepAnchor, TransactionScopeConfigurationExt, TransactionScopeOptions};
pub use decorator::TransactionScopeTransportDecorator;
pub use enlist::EnlistBus;
pub use error::EnlistError;
pub use step::TransactionScopeIncomingStep;
