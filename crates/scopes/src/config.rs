//! Configuration: handling messages inside transaction scopes

use crate::decorator::TransactionScopeTransportDecorator;
use crate::step::TransactionScopeIncomingStep;
use ambientbus_bus::{DeserializeStep, OptionsConfigurer, PipelineStepInjector, Position, Transport};
use ambientbus_core::{IsolationLevel, TransactionOptions};
use std::sync::Arc;
use std::time::Duration;

/// Where the transaction scope step goes in the incoming pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAnchor {
    /// Immediately before the named step
    Before(String),
    /// Immediately after the named step
    After(String),
}

impl StepAnchor {
    fn into_parts(self) -> (Position, String) {
        match self {
            StepAnchor::Before(name) => (Position::Before, name),
            StepAnchor::After(name) => (Position::After, name),
        }
    }
}

impl Default for StepAnchor {
    fn default() -> Self {
        StepAnchor::After(DeserializeStep::NAME.to_string())
    }
}

/// Settings for [`handle_messages_inside_transaction_scope_with`]
///
/// [`handle_messages_inside_transaction_scope_with`]: TransactionScopeConfigurationExt::handle_messages_inside_transaction_scope_with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionScopeOptions {
    /// Options every receive scope is created with
    pub transaction_options: TransactionOptions,
    /// Position of the step mounting the transaction
    pub anchor: StepAnchor,
}

impl TransactionScopeOptions {
    /// ReadCommitted, 60 seconds, step after "deserialize"
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.transaction_options = self.transaction_options.isolation_level(level);
        self
    }

    /// Set the transaction timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transaction_options = self.transaction_options.timeout(timeout);
        self
    }

    /// Set where the step is injected
    pub fn anchor(mut self, anchor: StepAnchor) -> Self {
        self.anchor = anchor;
        self
    }
}

/// Bus options for running handlers inside transaction scopes
pub trait TransactionScopeConfigurationExt {
    /// Handle every message inside a transaction scope with default options
    fn handle_messages_inside_transaction_scope(&mut self) -> &mut Self;

    /// Handle every message inside a transaction scope created with `options`
    fn handle_messages_inside_transaction_scope_with(
        &mut self,
        options: TransactionScopeOptions,
    ) -> &mut Self;
}

impl TransactionScopeConfigurationExt for OptionsConfigurer {
    fn handle_messages_inside_transaction_scope(&mut self) -> &mut Self {
        self.handle_messages_inside_transaction_scope_with(TransactionScopeOptions::default())
    }

    fn handle_messages_inside_transaction_scope_with(
        &mut self,
        options: TransactionScopeOptions,
    ) -> &mut Self {
        let transaction_options = options.transaction_options;
        let (position, anchor) = options.anchor.into_parts();

        self.decorate_transport(move |transport| {
            Arc::new(TransactionScopeTransportDecorator::new(transport, transaction_options))
                as Arc<dyn Transport>
        })
        .decorate_pipeline(move |pipeline| {
            PipelineStepInjector::new(pipeline)
                .on_receive(Arc::new(TransactionScopeIncomingStep), position, anchor)
                .build()
        })
    }
}
