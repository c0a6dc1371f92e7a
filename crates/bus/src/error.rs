//! Error types for transports, pipelines and the bus

use ambientbus_core::ContextError;
use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport)
#[derive(Debug, Error)]
pub enum TransportError {
    /// The receive was cancelled before a message arrived
    #[error("receive cancelled")]
    Cancelled,

    /// The transport has no input queue to receive from
    #[error("transport has no input queue")]
    NoInputQueue,

    /// The destination queue does not exist
    #[error("queue '{0}' does not exist")]
    UnknownQueue(String),

    /// Registering work on the transaction context failed
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Any other transport failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while assembling or running the incoming pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step was positioned relative to a step that is not in the pipeline
    #[error("cannot position step '{step}' relative to unknown step '{anchor}'")]
    UnknownAnchor {
        /// Step being injected
        step: String,
        /// Name it was anchored to
        anchor: String,
    },

    /// A step expected the message to be deserialized already
    #[error("message has not been deserialized; step '{0}' must run after 'deserialize'")]
    NotDeserialized(&'static str),

    /// The message carries no type header
    #[error("message {0} has no type header")]
    MissingType(String),

    /// The message body could not be decoded
    #[error("could not decode message body: {0}")]
    Decode(#[from] serde_json::Error),

    /// No handler is registered for the message type
    #[error("no handlers for message type '{0}'")]
    NoHandlers(String),
}

/// Errors raised by the bus
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus was started outside a tokio runtime
    #[error("the bus must be started from within a tokio runtime")]
    NoRuntime,

    /// No transport was configured
    #[error("no transport configured")]
    NoTransport,

    /// The bus has no input queue, so it cannot send to itself
    #[error("cannot send locally from a send-only bus")]
    SendOnly,

    /// The message could not be serialized
    #[error("could not serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Handing the message to the transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Committing the implicit transaction context failed
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The incoming pipeline could not be assembled
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
