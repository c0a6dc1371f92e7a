//! Transport abstraction and cancellation

use crate::error::TransportError;
use crate::message::TransportMessage;
use ambientbus_core::TransactionContext;
use async_trait::async_trait;
use tokio::sync::watch;

/// Owner side of a cancellation signal
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl CancellationSource {
    /// New, not yet cancelled
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        CancellationSource { tx }
    }

    /// Signal handed to cancellable operations
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Cancel every signal derived from this source
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation flag
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancellationSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        CancellationSignal { rx: None }
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve once cancellation is requested
    ///
    /// Never resolves for [`never`](Self::never) or when the source was
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        let fired = rx.wait_for(|cancelled| *cancelled).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

/// Message transport
///
/// Outgoing messages are attached to the transaction context and leave the
/// process only when the context commits. A received message is
/// acknowledged when the context commits and returned to its queue when the
/// context is disposed without committing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Make sure a queue exists
    async fn create_queue(&self, address: &str) -> Result<(), TransportError>;

    /// Send `message` to `destination` as part of `context`
    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        context: &TransactionContext,
    ) -> Result<(), TransportError>;

    /// Receive the next message, if any, as part of `context`
    async fn receive(
        &self,
        context: &TransactionContext,
        cancellation: &CancellationSignal,
    ) -> Result<Option<TransportMessage>, TransportError>;

    /// Input queue, None for a send-only transport
    fn address(&self) -> Option<&str>;
}
