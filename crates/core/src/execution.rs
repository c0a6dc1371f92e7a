//! Execution context carried across `.await` points
//!
//! Every message flow runs inside a task-local frame. A frame carries:
//! - the ambient transaction visible to the flow (see [`Transaction::current`])
//! - a slot holding the current [`TransactionContext`]
//!
//! Frames nest. A nested frame starts with its parent's current context, but
//! changes made to its slot never leak back to the parent. Frames do not
//! follow `tokio::spawn`; a spawned task starts without a frame.
//!
//! [`Transaction::current`]: crate::ambient::Transaction::current

use crate::ambient::Transaction;
use crate::context::TransactionContext;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static FRAME: Frame;
}

#[derive(Clone)]
struct Frame {
    ambient: Option<Transaction>,
    slot: ContextSlot,
}

/// Mutable holder for the current transaction context of one frame
#[derive(Clone, Default)]
pub struct ContextSlot(Arc<Mutex<Option<TransactionContext>>>);

impl ContextSlot {
    fn seeded(context: Option<TransactionContext>) -> Self {
        ContextSlot(Arc::new(Mutex::new(context)))
    }

    /// Context currently held
    pub fn get(&self) -> Option<TransactionContext> {
        self.0.lock().clone()
    }

    /// Make `context` current, returning the previous one
    pub fn set(&self, context: TransactionContext) -> Option<TransactionContext> {
        self.0.lock().replace(context)
    }

    /// Clear the slot if it still holds `context`
    pub fn clear_if(&self, context: &TransactionContext) -> bool {
        let mut current = self.0.lock();
        match current.as_ref() {
            Some(held) if held.same_as(context) => {
                *current = None;
                true
            }
            _ => false,
        }
    }
}

/// Ambient transaction of the current frame
pub fn current_transaction() -> Option<Transaction> {
    FRAME.try_with(|frame| frame.ambient.clone()).ok().flatten()
}

/// Transaction context of the current frame
pub fn current_context() -> Option<TransactionContext> {
    FRAME.try_with(|frame| frame.slot.get()).ok().flatten()
}

/// Context slot of the current frame, None outside any frame
pub fn current_slot() -> Option<ContextSlot> {
    FRAME.try_with(|frame| frame.slot.clone()).ok()
}

/// Run `fut` in a frame whose ambient transaction is `ambient`
pub async fn with_ambient<F: Future>(ambient: Option<Transaction>, fut: F) -> F::Output {
    let frame = Frame {
        ambient,
        slot: ContextSlot::seeded(current_context()),
    };
    FRAME.scope(frame, fut).await
}

/// Run `fut` in a frame whose current transaction context is `context`
///
/// The ambient transaction of the enclosing frame stays visible.
pub async fn with_context<F: Future>(context: TransactionContext, fut: F) -> F::Output {
    let frame = Frame {
        ambient: current_transaction(),
        slot: ContextSlot::seeded(Some(context)),
    };
    FRAME.scope(frame, fut).await
}
