//! Errors raised when enlisting a bus transaction in an ambient scope

use ambientbus_core::AmbientError;
use thiserror::Error;

/// Reasons [`EnlistBus::enlist_bus`](crate::EnlistBus::enlist_bus) can fail
///
/// Every variant is raised before any transaction context is created.
#[derive(Debug, Error)]
pub enum EnlistError {
    /// A bus transaction context is already current in this execution context
    #[error(
        "cannot start a new bus transaction because there is already one associated \
         with the current execution context"
    )]
    AlreadyEnlisted,

    /// No ambient transaction is visible
    #[error(
        "cannot enlist a bus transaction in the current transaction scope because there \
         is no current ambient transaction. Did you create the scope with \
         AsyncFlow::Suppressed, or call enlist_bus outside TransactionScope::run? The \
         scope must be created with AsyncFlow::Enabled and the code that enlists must \
         run inside scope.run(..), otherwise the ambient transaction does not flow \
         across .await points"
    )]
    NoAmbientTransaction,

    /// The ambient transaction refused the enlistment
    #[error(transparent)]
    Ambient(#[from] AmbientError),
}
