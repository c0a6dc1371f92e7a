//! Ambient transaction handle and its commit protocol

use super::enlistment::{Acknowledgment, Enlistment, EnlistmentNotification, PreparingEnlistment, Vote};
use super::options::{IsolationLevel, TransactionOptions, TransactionStatus};
use crate::error::AmbientError;
use crate::execution;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, warn};
use uuid::Uuid;

type CompletedHandler = Box<dyn FnOnce(TransactionStatus) + Send>;
type Participant = Arc<dyn EnlistmentNotification>;
type Notify = fn(&dyn EnlistmentNotification, Enlistment);

#[derive(Debug, Clone)]
struct Outcome {
    status: TransactionStatus,
    failures: Vec<String>,
}

struct State {
    status: TransactionStatus,
    /// Set while the protocol runs; no enlistments are accepted meanwhile
    concluding: bool,
    settled: bool,
    participants: Vec<Participant>,
    completed: Vec<CompletedHandler>,
}

struct Inner {
    id: Uuid,
    isolation_level: IsolationLevel,
    timeout: Duration,
    deadline: Instant,
    state: Mutex<State>,
    outcome: watch::Sender<Option<Outcome>>,
}

/// Handle to an ambient transaction
///
/// Cloning is cheap; all clones refer to the same transaction. A
/// transaction is created by a root [`TransactionScope`] and resolved when
/// that scope is disposed.
///
/// [`TransactionScope`]: super::TransactionScope
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl Transaction {
    pub(crate) fn begin(options: &TransactionOptions) -> Self {
        let (outcome, _) = watch::channel(None);
        let transaction = Transaction {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                isolation_level: options.isolation_level,
                timeout: options.timeout,
                deadline: Instant::now() + options.timeout,
                state: Mutex::new(State {
                    status: TransactionStatus::Active,
                    concluding: false,
                    settled: false,
                    participants: Vec::new(),
                    completed: Vec::new(),
                }),
                outcome,
            }),
        };
        debug!(
            transaction_id = %transaction.inner.id,
            isolation_level = ?options.isolation_level,
            timeout_ms = options.timeout.as_millis() as u64,
            "ambient transaction started"
        );
        transaction
    }

    /// Ambient transaction visible in the current execution context
    pub fn current() -> Option<Transaction> {
        execution::current_transaction()
    }

    /// Unique id
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Isolation level the transaction was created with
    pub fn isolation_level(&self) -> IsolationLevel {
        self.inner.isolation_level
    }

    /// Timeout the transaction was created with
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.inner.state.lock().status
    }

    /// Whether both handles refer to the same transaction
    pub fn same_as(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of enlisted participants still awaiting the outcome
    pub fn participant_count(&self) -> usize {
        self.inner.state.lock().participants.len()
    }

    /// Whether a participant with this resource manager id is enlisted
    pub fn has_resource_manager(&self, resource_manager_id: Uuid) -> bool {
        self.inner
            .state
            .lock()
            .participants
            .iter()
            .any(|p| p.resource_manager_id() == Some(resource_manager_id))
    }

    /// Enlist a volatile participant in the commit protocol
    pub fn enlist_volatile(&self, participant: Participant) -> Result<(), AmbientError> {
        let mut state = self.inner.state.lock();
        if state.status != TransactionStatus::Active || state.concluding {
            return Err(AmbientError::NotActive {
                transaction_id: self.inner.id,
                status: state.status,
            });
        }
        if let Some(rm) = participant.resource_manager_id() {
            if state
                .participants
                .iter()
                .any(|p| p.resource_manager_id() == Some(rm))
            {
                return Err(AmbientError::DuplicateEnlistment {
                    transaction_id: self.inner.id,
                    resource_manager_id: rm,
                });
            }
        }
        state.participants.push(participant);
        debug!(
            transaction_id = %self.inner.id,
            participants = state.participants.len(),
            "volatile participant enlisted"
        );
        Ok(())
    }

    /// Subscribe to the completed event
    ///
    /// Handlers run once, after every participant acknowledged phase two.
    /// Subscribing to a settled transaction runs the handler immediately.
    pub fn on_completed<F>(&self, handler: F)
    where
        F: FnOnce(TransactionStatus) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.settled {
            let status = state.status;
            drop(state);
            handler(status);
            return;
        }
        state.completed.push(Box::new(handler));
    }

    /// Roll the transaction back
    ///
    /// No-op unless the transaction is Active.
    pub fn rollback(&self) {
        let Some(participants) = self.begin_conclusion() else {
            return;
        };
        debug!(transaction_id = %self.inner.id, "rolling back ambient transaction");
        self.conclude(TransactionStatus::Aborted, &participants, None, |p, e| {
            p.rollback(e)
        });
    }

    /// Run the two-phase commit protocol
    pub(crate) fn commit(&self) {
        let Some(participants) = self.begin_conclusion() else {
            return;
        };

        if Instant::now() >= self.inner.deadline {
            warn!(
                transaction_id = %self.inner.id,
                timeout_ms = self.inner.timeout.as_millis() as u64,
                "ambient transaction timed out before commit, rolling back"
            );
            self.conclude(TransactionStatus::Aborted, &participants, None, |p, e| {
                p.rollback(e)
            });
            return;
        }

        for (index, participant) in participants.iter().enumerate() {
            let (preparing, vote) = PreparingEnlistment::new();
            participant.prepare(preparing);
            let vote = vote.lock().take();
            let reason = match vote {
                Some(Vote::Prepared) => continue,
                Some(Vote::ForceRollback(reason)) => reason,
                None => "participant returned from prepare without voting".to_string(),
            };
            warn!(
                transaction_id = %self.inner.id,
                participant = index,
                reason = %reason,
                "prepare vote forced rollback"
            );
            self.conclude(
                TransactionStatus::Aborted,
                &participants,
                Some(index),
                |p, e| p.rollback(e),
            );
            return;
        }

        if Instant::now() >= self.inner.deadline {
            warn!(
                transaction_id = %self.inner.id,
                "ambient transaction timed out during prepare, outcome in doubt"
            );
            self.conclude(TransactionStatus::InDoubt, &participants, None, |p, e| {
                p.in_doubt(e)
            });
            return;
        }

        debug!(
            transaction_id = %self.inner.id,
            participants = participants.len(),
            "committing ambient transaction"
        );
        self.conclude(TransactionStatus::Committed, &participants, None, |p, e| {
            p.commit(e)
        });
    }

    /// Wait until the outcome is published
    ///
    /// Fails with [`AmbientError::EnlistmentFailed`] when any participant
    /// reported failure, so a commit is never reported without every
    /// participant having succeeded.
    pub async fn outcome(&self) -> Result<TransactionStatus, AmbientError> {
        let transaction_id = self.inner.id;
        let mut rx = self.inner.outcome.subscribe();
        let settled = {
            let guard = rx
                .wait_for(Option::is_some)
                .await
                .map_err(|_| AmbientError::Abandoned { transaction_id })?;
            guard.clone()
        };
        match settled {
            Some(outcome) if outcome.failures.is_empty() => Ok(outcome.status),
            Some(outcome) => Err(AmbientError::EnlistmentFailed {
                transaction_id,
                failures: outcome.failures,
            }),
            None => Err(AmbientError::Abandoned { transaction_id }),
        }
    }

    fn begin_conclusion(&self) -> Option<Vec<Participant>> {
        let mut state = self.inner.state.lock();
        if state.status != TransactionStatus::Active || state.concluding {
            return None;
        }
        state.concluding = true;
        Some(state.participants.clone())
    }

    fn conclude(
        &self,
        status: TransactionStatus,
        participants: &[Participant],
        skip: Option<usize>,
        notify: Notify,
    ) {
        {
            let mut state = self.inner.state.lock();
            state.status = status;
            state.concluding = false;
        }

        let mut pending = Vec::with_capacity(participants.len());
        for (index, participant) in participants.iter().enumerate() {
            if skip == Some(index) {
                continue;
            }
            let (enlistment, ack) = Enlistment::new(self.inner.id);
            notify(participant.as_ref(), enlistment);
            pending.push(ack);
        }

        self.settle(status, pending);
    }

    fn settle(&self, status: TransactionStatus, pending: Vec<oneshot::Receiver<Acknowledgment>>) {
        if pending.is_empty() {
            self.publish(status, Vec::new());
            return;
        }

        match Handle::try_current() {
            Ok(runtime) => {
                let transaction = self.clone();
                runtime.spawn(async move {
                    let mut failures = Vec::new();
                    for ack in pending {
                        match ack.await {
                            Ok(Acknowledgment::Done) => {}
                            Ok(Acknowledgment::Failed(reason)) => failures.push(reason),
                            Err(_) => failures.push(
                                "participant dropped its enlistment without acknowledging"
                                    .to_string(),
                            ),
                        }
                    }
                    transaction.publish(status, failures);
                });
            }
            Err(_) => {
                warn!(
                    transaction_id = %self.inner.id,
                    "no async runtime to await acknowledgments, settling immediately"
                );
                let failures = pending
                    .into_iter()
                    .filter_map(|mut ack| match ack.try_recv() {
                        Ok(Acknowledgment::Done) => None,
                        Ok(Acknowledgment::Failed(reason)) => Some(reason),
                        Err(_) => Some("no acknowledgment before settlement".to_string()),
                    })
                    .collect();
                self.publish(status, failures);
            }
        }
    }

    fn publish(&self, status: TransactionStatus, failures: Vec<String>) {
        let handlers = {
            let mut state = self.inner.state.lock();
            state.settled = true;
            state.participants.clear();
            std::mem::take(&mut state.completed)
        };

        if failures.is_empty() {
            debug!(transaction_id = %self.inner.id, ?status, "ambient transaction settled");
        } else {
            error!(
                transaction_id = %self.inner.id,
                ?status,
                failures = ?failures,
                "ambient transaction settled with failed enlistments"
            );
        }

        for handler in handlers {
            handler(status);
        }
        self.inner.outcome.send_replace(Some(Outcome { status, failures }));
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("isolation_level", &self.inner.isolation_level)
            .field("status", &state.status)
            .field("participants", &state.participants.len())
            .finish()
    }
}
