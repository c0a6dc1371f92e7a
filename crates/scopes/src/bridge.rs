//! Participant tying a bus transaction context to an ambient transaction
//!
//! ```text
//! Enlisted ──prepare──► Prepared ──commit──► Committing ──ok──► Committed
//!    │                     │                     └──err──► CommitFailed
//!    │                     ├──rollback──► RolledBack
//!    └─────────────────────┴──in_doubt──► InDoubt
//! ```
//!
//! Committing completes the bus transaction context on a spawned task and
//! acknowledges only once its commit hooks have finished.

use ambientbus_core::{ContextSlot, Enlistment, EnlistmentNotification, PreparingEnlistment, TransactionContext};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Resource manager id of every bridge; one bus enlistment per transaction
pub const BUS_RESOURCE_MANAGER_ID: Uuid = Uuid::from_u128(0x6a1d_52c4_0b7e_4f3a_9c1e_3d2b_8f47_a015);

/// Progress of a bridge through the commit protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Enlisted, no notification yet
    Enlisted,
    /// Voted prepared
    Prepared,
    /// Completing the bus transaction context
    Committing,
    /// The bus transaction context committed
    Committed,
    /// The bus transaction context failed to commit
    CommitFailed,
    /// The ambient transaction rolled back
    RolledBack,
    /// The outcome is unknown
    InDoubt,
}

impl BridgeState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BridgeState::Committed
                | BridgeState::CommitFailed
                | BridgeState::RolledBack
                | BridgeState::InDoubt
        )
    }
}

/// Volatile participant wrapping one bus transaction context
#[derive(Clone)]
pub struct AmbientTransactionBridge {
    context: TransactionContext,
    slot: ContextSlot,
    state: Arc<Mutex<BridgeState>>,
    disposed: Arc<AtomicBool>,
}

impl AmbientTransactionBridge {
    /// Bridge for `context`, which was made current in `slot`
    pub fn new(context: TransactionContext, slot: ContextSlot) -> Self {
        AmbientTransactionBridge {
            context,
            slot,
            state: Arc::new(Mutex::new(BridgeState::Enlisted)),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bus transaction context driven by this bridge
    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    /// Current state
    pub fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    /// Whether [`dispose`](Self::dispose) has run
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn transition(&self, next: BridgeState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            warn!(
                context_id = %self.context.id(),
                current = ?*state,
                requested = ?next,
                "ignoring transition of settled bus enlistment"
            );
            return false;
        }
        *state = next;
        true
    }

    /// Release the bus transaction context
    ///
    /// Clears the execution-context slot if it still holds the context, then
    /// disposes the context. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.slot.clear_if(&self.context);
        self.context.dispose();
        debug!(context_id = %self.context.id(), state = ?self.state(), "bus enlistment disposed");
    }

    async fn complete_and_acknowledge(self, enlistment: Enlistment) {
        match self.context.complete().await {
            Ok(()) => {
                self.transition(BridgeState::Committed);
                self.dispose();
                enlistment.done();
            }
            Err(e) => {
                error!(
                    context_id = %self.context.id(),
                    transaction_id = %enlistment.transaction_id(),
                    error = %e,
                    "bus transaction failed to commit with the ambient transaction"
                );
                self.transition(BridgeState::CommitFailed);
                self.dispose();
                enlistment.failed(e.to_string());
            }
        }
    }
}

impl EnlistmentNotification for AmbientTransactionBridge {
    fn prepare(&self, preparing: PreparingEnlistment) {
        self.transition(BridgeState::Prepared);
        preparing.prepared();
    }

    fn commit(&self, enlistment: Enlistment) {
        if !self.transition(BridgeState::Committing) {
            enlistment.done();
            return;
        }
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(self.clone().complete_and_acknowledge(enlistment));
            }
            Err(_) => {
                error!(
                    context_id = %self.context.id(),
                    "no async runtime to complete the bus transaction on"
                );
                self.transition(BridgeState::CommitFailed);
                self.dispose();
                enlistment.failed("no async runtime to complete the bus transaction on");
            }
        }
    }

    fn rollback(&self, enlistment: Enlistment) {
        self.transition(BridgeState::RolledBack);
        self.dispose();
        enlistment.done();
    }

    fn in_doubt(&self, enlistment: Enlistment) {
        self.transition(BridgeState::InDoubt);
        enlistment.done();
    }

    fn resource_manager_id(&self) -> Option<Uuid> {
        Some(BUS_RESOURCE_MANAGER_ID)
    }
}

impl std::fmt::Debug for AmbientTransactionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientTransactionBridge")
            .field("context", &self.context.id())
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
