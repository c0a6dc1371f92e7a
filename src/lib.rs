//! # ambientbus
//!
//! In-process message bus whose message handling and sending can take part
//! in ambient transactions.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ambientbus::prelude::*;
//!
//! let activator = Arc::new(HandlerActivator::new());
//! activator.handle(|text: String| async move {
//!     // Transaction::current() is the transaction opened at receive time
//!     Ok(())
//! });
//!
//! let bus = BusBuilder::new(activator)
//!     .transport(InMemTransport::new(InMemNetwork::new(), "input"))
//!     .options(|o| {
//!         o.handle_messages_inside_transaction_scope();
//!     })
//!     .start()
//!     .await?;
//!
//! // Sending as part of an application-owned transaction
//! let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
//! scope.run(async {
//!     scope.enlist_bus()?;
//!     bus.send_local(&"hello".to_string()).await?;
//!     scope.complete();
//!     Ok::<_, ambientbus::Error>(())
//! }).await?;
//! scope.finish().await?;
//! ```
//!
//! ## Crates
//!
//! - [`ambientbus_core`]: transaction contexts, ambient transactions,
//!   execution context
//! - [`ambientbus_bus`]: transports, pipeline, handlers, workers
//! - [`ambientbus_scopes`]: transaction scope integration

#![warn(missing_docs)]

mod error;

pub mod prelude;

pub use error::{Error, Result};

pub use ambientbus_bus::{
    Bus, BusBuilder, BusError, Failed, HandlerActivator, InMemNetwork, InMemTransport,
    OptionsConfigurer, RetryOptions, Transport,
};
pub use ambientbus_core::execution;
pub use ambientbus_core::{
    AsyncFlow, IsolationLevel, ScopeOption, Transaction, TransactionContext, TransactionOptions,
    TransactionScope, TransactionStatus,
};
pub use ambientbus_scopes::{
    EnlistBus, EnlistError, StepAnchor, TransactionScopeConfigurationExt, TransactionScopeOptions,
};
