//! Enlisting a bus transaction in an ambient transaction scope

use crate::bridge::{AmbientTransactionBridge, BUS_RESOURCE_MANAGER_ID};
use crate::error::EnlistError;
use ambientbus_core::{
    execution, AmbientError, Transaction, TransactionContext, TransactionScope, TransactionStatus,
};
use std::sync::Arc;
use tracing::debug;

/// Start a bus transaction that commits with the ambient transaction
pub trait EnlistBus {
    /// Create a bus transaction context, make it current and enlist it in
    /// the ambient transaction
    ///
    /// Messages sent afterwards in the same execution context leave only if
    /// the ambient transaction commits. Can be called once per ambient
    /// transaction.
    ///
    /// ```ignore
    /// let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
    /// scope.run(async {
    ///     scope.enlist_bus()?;
    ///     bus.send_local(&"hello".to_string()).await?;
    ///     scope.complete();
    ///     Ok::<_, anyhow::Error>(())
    /// }).await?;
    /// scope.finish().await?;
    /// ```
    fn enlist_bus(&self) -> Result<&Self, EnlistError>;
}

impl EnlistBus for TransactionScope {
    fn enlist_bus(&self) -> Result<&Self, EnlistError> {
        if execution::current_context().is_some() {
            return Err(EnlistError::AlreadyEnlisted);
        }
        let transaction = Transaction::current().ok_or(EnlistError::NoAmbientTransaction)?;
        let slot = execution::current_slot().ok_or(EnlistError::NoAmbientTransaction)?;
        if transaction.has_resource_manager(BUS_RESOURCE_MANAGER_ID) {
            return Err(EnlistError::AlreadyEnlisted);
        }
        let status = transaction.status();
        if status != TransactionStatus::Active {
            return Err(AmbientError::NotActive {
                transaction_id: transaction.id(),
                status,
            }
            .into());
        }

        let context = TransactionContext::new();
        let bridge = AmbientTransactionBridge::new(context.clone(), slot.clone());
        if let Err(e) = transaction.enlist_volatile(Arc::new(bridge.clone())) {
            context.dispose();
            return Err(match e {
                AmbientError::DuplicateEnlistment { .. } => EnlistError::AlreadyEnlisted,
                other => other.into(),
            });
        }
        slot.set(context.clone());
        transaction.on_completed(move |_| bridge.dispose());

        debug!(
            transaction_id = %transaction.id(),
            context_id = %context.id(),
            "bus transaction enlisted in ambient transaction"
        );
        Ok(self)
    }
}
