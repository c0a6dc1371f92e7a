//! Transport decorator opening an ambient scope around each receive

use ambientbus_bus::{CancellationSignal, Transport, TransportError, TransportMessage};
use ambientbus_core::{
    AsyncFlow, Disposition, ScopeOption, TransactionContext, TransactionOptions, TransactionScope,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs everything from receive to acknowledgment inside a transaction scope
///
/// The scope is resolved when the transaction context is disposed: it is
/// completed only if the context committed, that is every commit hook
/// succeeded, so the ambient transaction commits only for messages that
/// were processed successfully. The transaction is stashed on
/// the context for [`TransactionScopeIncomingStep`](crate::TransactionScopeIncomingStep)
/// to mount again around the handlers.
pub struct TransactionScopeTransportDecorator {
    inner: Arc<dyn Transport>,
    options: TransactionOptions,
}

impl TransactionScopeTransportDecorator {
    /// Decorate `inner`; scopes are created with `options`
    pub fn new(inner: Arc<dyn Transport>, options: TransactionOptions) -> Self {
        TransactionScopeTransportDecorator { inner, options }
    }
}

#[async_trait]
impl Transport for TransactionScopeTransportDecorator {
    async fn create_queue(&self, address: &str) -> Result<(), TransportError> {
        self.inner.create_queue(address).await
    }

    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        context: &TransactionContext,
    ) -> Result<(), TransportError> {
        self.inner.send(destination, message, context).await
    }

    async fn receive(
        &self,
        context: &TransactionContext,
        cancellation: &CancellationSignal,
    ) -> Result<Option<TransportMessage>, TransportError> {
        let scope = TransactionScope::new(ScopeOption::Required, self.options, AsyncFlow::Enabled);
        let transaction = scope.transaction();

        context.on_dispose(move |disposition| {
            if disposition == Disposition::Committed {
                scope.complete();
            }
            scope.dispose();
        })?;

        debug!(
            context_id = %context.id(),
            transaction_id = ?transaction.as_ref().map(|t| t.id()),
            "receiving inside transaction scope"
        );
        context.set_ambient_transaction(transaction);

        self.inner.receive(context, cancellation).await
    }

    fn address(&self) -> Option<&str> {
        self.inner.address()
    }
}
