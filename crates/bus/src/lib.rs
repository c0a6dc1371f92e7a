//! Message bus for ambientbus
//!
//! This crate provides the bus the transaction scope integration plugs into:
//! - Transport: async trait plus an in-memory implementation ([`inmem`])
//! - Message envelopes and JSON serialization ([`message`])
//! - Incoming pipeline with named steps and relative injection ([`pipeline`])
//! - Default steps: retry with error queue and second-level retries,
//!   deserialize, dispatch ([`steps`])
//! - Typed handlers ([`handlers`])
//! - The bus itself with its worker loop ([`bus`])
//!
//! Every received message is processed inside its own
//! [`TransactionContext`](ambientbus_core::TransactionContext); outgoing
//! messages and acknowledgments are attached to that context as commit and
//! dispose hooks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod error;
pub mod handlers;
pub mod inmem;
pub mod message;
pub mod pipeline;
pub mod steps;
pub mod transport;

pub use bus::{Bus, BusBuilder, OptionsConfigurer};
pub use error::{BusError, PipelineError, TransportError};
pub use handlers::HandlerActivator;
pub use inmem::{InMemNetwork, InMemTransport};
pub use message::{Failed, Headers, Message, TransportMessage};
pub use pipeline::{
    DispatchMode, IncomingStep, IncomingStepContext, Next, Pipeline, PipelineStepInjector,
    Position,
};
pub use steps::{DeserializeStep, DispatchStep, RetryOptions, RetryStep};
pub use transport::{CancellationSignal, CancellationSource, Transport};
