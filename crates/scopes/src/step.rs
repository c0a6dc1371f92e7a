//! Incoming step mounting the stashed ambient transaction around handlers

use ambientbus_bus::{IncomingStep, IncomingStepContext, Next};
use ambientbus_core::{AsyncFlow, TransactionScope};
use async_trait::async_trait;
use tracing::debug;

/// Makes the transaction stashed at receive time ambient while the rest of
/// the pipeline runs
///
/// Messages without a stashed transaction pass through untouched. The
/// step's scope is completed only when the rest of the pipeline succeeds;
/// otherwise it vetoes the transaction. Errors propagate unchanged.
#[derive(Debug, Default)]
pub struct TransactionScopeIncomingStep;

impl TransactionScopeIncomingStep {
    /// Step name
    pub const NAME: &'static str = "transaction-scope";
}

#[async_trait]
impl IncomingStep for TransactionScopeIncomingStep {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn process(&self, context: &mut IncomingStepContext, next: Next<'_>) -> anyhow::Result<()> {
        let Some(transaction) = context.transaction_context.ambient_transaction() else {
            return next.run(context).await;
        };

        debug!(transaction_id = %transaction.id(), "mounting ambient transaction");
        let scope = TransactionScope::bound_to(transaction, AsyncFlow::Enabled);
        let result = scope.run(next.run(context)).await;
        if result.is_ok() {
            scope.complete();
        }
        scope.dispose();
        result
    }
}
