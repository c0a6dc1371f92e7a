//! Enlistment protocol between the manager and its participants

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Participant in an ambient transaction's commit protocol
///
/// The manager calls these on its own schedule, never concurrently for the
/// same participant. Implementations must return promptly; long-running
/// work belongs on a spawned task that acknowledges through the
/// [`Enlistment`] when it finishes.
pub trait EnlistmentNotification: Send + Sync {
    /// Phase one: vote through `preparing` before returning
    fn prepare(&self, preparing: PreparingEnlistment);

    /// Phase two, transaction committed
    fn commit(&self, enlistment: Enlistment);

    /// Phase two, transaction rolled back
    fn rollback(&self, enlistment: Enlistment);

    /// Phase two, outcome unknown
    fn in_doubt(&self, enlistment: Enlistment);

    /// Identity used to reject a second enlistment of the same resource
    fn resource_manager_id(&self) -> Option<Uuid> {
        None
    }
}

/// Phase-one vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    /// Ready to commit
    Prepared,
    /// Transaction must roll back
    ForceRollback(String),
}

/// Handle through which a participant casts its phase-one vote
pub struct PreparingEnlistment {
    vote: Arc<Mutex<Option<Vote>>>,
}

impl PreparingEnlistment {
    pub(crate) fn new() -> (Self, Arc<Mutex<Option<Vote>>>) {
        let vote = Arc::new(Mutex::new(None));
        (PreparingEnlistment { vote: vote.clone() }, vote)
    }

    /// Vote to commit
    pub fn prepared(self) {
        *self.vote.lock() = Some(Vote::Prepared);
    }

    /// Vote to roll back
    pub fn force_rollback(self, reason: impl Into<String>) {
        *self.vote.lock() = Some(Vote::ForceRollback(reason.into()));
    }
}

#[derive(Debug)]
pub(crate) enum Acknowledgment {
    Done,
    Failed(String),
}

/// Handle through which a participant acknowledges a phase-two notification
///
/// Dropping it without calling [`done`](Enlistment::done) or
/// [`failed`](Enlistment::failed) counts as a failure.
pub struct Enlistment {
    transaction_id: Uuid,
    ack: oneshot::Sender<Acknowledgment>,
}

impl Enlistment {
    pub(crate) fn new(transaction_id: Uuid) -> (Self, oneshot::Receiver<Acknowledgment>) {
        let (ack, rx) = oneshot::channel();
        (Enlistment { transaction_id, ack }, rx)
    }

    /// Transaction this enlistment belongs to
    pub fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    /// The notification was handled
    pub fn done(self) {
        let _ = self.ack.send(Acknowledgment::Done);
    }

    /// The notification could not be handled
    pub fn failed(self, reason: impl Into<String>) {
        let _ = self.ack.send(Acknowledgment::Failed(reason.into()));
    }
}
