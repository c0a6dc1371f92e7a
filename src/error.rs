//! Unified error type for ambientbus.
//!
//! Wraps the error of every crate so applications can use one `Result`
//! across configuration, sending and enlisting.

use ambientbus_bus::{BusError, PipelineError, TransportError};
use ambientbus_core::{AmbientError, ContextError};
use ambientbus_scopes::EnlistError;
use thiserror::Error;

/// All ambientbus errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Transaction context misuse or failed commit hook
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Ambient transaction refused an operation or settled with failures
    #[error(transparent)]
    Ambient(#[from] AmbientError),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Pipeline assembly or processing failure
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Bus failure
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Enlisting a bus transaction failed
    #[error(transparent)]
    Enlist(#[from] EnlistError),
}

/// Result type for ambientbus operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this is a precondition failure of `enlist_bus`.
    pub fn is_enlist_precondition(&self) -> bool {
        matches!(
            self,
            Error::Enlist(EnlistError::AlreadyEnlisted | EnlistError::NoAmbientTransaction)
        )
    }

    /// Check if an ambient transaction reported failed participants.
    pub fn is_enlistment_failure(&self) -> bool {
        matches!(
            self,
            Error::Ambient(AmbientError::EnlistmentFailed { .. })
                | Error::Enlist(EnlistError::Ambient(AmbientError::EnlistmentFailed { .. }))
        )
    }
}
