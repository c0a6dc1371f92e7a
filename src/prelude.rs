//! Convenient imports for ambientbus.
//!
//! ```ignore
//! use ambientbus::prelude::*;
//! ```

// Error handling
pub use crate::error::{Error, Result};

// Bus
pub use ambientbus_bus::{
    Bus, BusBuilder, Failed, HandlerActivator, InMemNetwork, InMemTransport, RetryOptions,
};

// Ambient transactions
pub use ambientbus_core::{AsyncFlow, ScopeOption, Transaction, TransactionOptions, TransactionScope};

// Transaction scope integration
pub use ambientbus_scopes::{EnlistBus, TransactionScopeConfigurationExt, TransactionScopeOptions};

pub use std::sync::Arc;
