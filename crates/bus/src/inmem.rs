//! In-memory transport
//!
//! Queues live in an [`InMemNetwork`] shared by every transport created on
//! it, so several buses in one process can talk to each other.

use crate::error::TransportError;
use crate::message::TransportMessage;
use crate::transport::{CancellationSignal, Transport};
use ambientbus_core::{Disposition, TransactionContext};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// Set of named in-memory queues
#[derive(Clone, Default)]
pub struct InMemNetwork {
    queues: Arc<DashMap<String, VecDeque<TransportMessage>>>,
}

impl InMemNetwork {
    /// Empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue if it does not exist
    pub fn create_queue(&self, address: &str) {
        self.queues.entry(address.to_string()).or_default();
    }

    /// Whether a queue exists
    pub fn has_queue(&self, address: &str) -> bool {
        self.queues.contains_key(address)
    }

    /// Remove a queue and every message waiting in it
    pub fn delete_queue(&self, address: &str) -> usize {
        self.queues.remove(address).map(|(_, q)| q.len()).unwrap_or(0)
    }

    /// Append a message to a queue
    pub fn deliver(&self, address: &str, message: TransportMessage) -> Result<(), TransportError> {
        let mut queue = self
            .queues
            .get_mut(address)
            .ok_or_else(|| TransportError::UnknownQueue(address.to_string()))?;
        queue.push_back(message);
        Ok(())
    }

    /// Take the next message from a queue
    pub fn get_next(&self, address: &str) -> Option<TransportMessage> {
        self.queues.get_mut(address)?.pop_front()
    }

    /// Number of messages waiting in a queue
    pub fn count(&self, address: &str) -> usize {
        self.queues.get(address).map(|q| q.len()).unwrap_or(0)
    }
}

/// Transport over an [`InMemNetwork`]
pub struct InMemTransport {
    network: InMemNetwork,
    address: Option<String>,
}

impl InMemTransport {
    /// Transport receiving from `address`, created on demand
    pub fn new(network: InMemNetwork, address: impl Into<String>) -> Self {
        let address = address.into();
        network.create_queue(&address);
        InMemTransport {
            network,
            address: Some(address),
        }
    }

    /// Transport that can only send
    pub fn send_only(network: InMemNetwork) -> Self {
        InMemTransport {
            network,
            address: None,
        }
    }

    /// Network this transport is attached to
    pub fn network(&self) -> &InMemNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for InMemTransport {
    async fn create_queue(&self, address: &str) -> Result<(), TransportError> {
        self.network.create_queue(address);
        Ok(())
    }

    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        context: &TransactionContext,
    ) -> Result<(), TransportError> {
        if !self.network.has_queue(destination) {
            return Err(TransportError::UnknownQueue(destination.to_string()));
        }
        let network = self.network.clone();
        let destination = destination.to_string();
        context.on_commit(move || async move {
            network.deliver(&destination, message)?;
            Ok(())
        })?;
        Ok(())
    }

    async fn receive(
        &self,
        context: &TransactionContext,
        cancellation: &CancellationSignal,
    ) -> Result<Option<TransportMessage>, TransportError> {
        if cancellation.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let address = self.address.as_deref().ok_or(TransportError::NoInputQueue)?;
        let Some(message) = self.network.get_next(address) else {
            return Ok(None);
        };

        let network = self.network.clone();
        let queue = address.to_string();
        let returned = message.clone();
        let registered = context.on_dispose(move |disposition| {
            if disposition == Disposition::RolledBack {
                debug!(
                    queue = %queue,
                    message_id = returned.message_id().unwrap_or("<none>"),
                    "returning message to queue"
                );
                let message_id = returned.message_id().unwrap_or("<none>").to_string();
                if let Err(e) = network.deliver(&queue, returned) {
                    warn!(
                        queue = %queue,
                        message_id = %message_id,
                        error = %e,
                        "could not return message to queue, message lost"
                    );
                }
            }
        });
        if let Err(e) = registered {
            self.network.deliver(address, message)?;
            return Err(e.into());
        }

        Ok(Some(message))
    }

    fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{serialize, Headers};

    fn msg(n: u32) -> TransportMessage {
        serialize(&n, Headers::new()).unwrap()
    }

    #[tokio::test]
    async fn test_send_is_deferred_until_commit() {
        let network = InMemNetwork::new();
        let transport = InMemTransport::new(network.clone(), "input");
        let ctx = TransactionContext::new();

        transport.send("input", msg(1), &ctx).await.unwrap();
        assert_eq!(network.count("input"), 0);

        ctx.complete().await.unwrap();
        assert_eq!(network.count("input"), 1);
    }

    #[tokio::test]
    async fn test_send_to_unknown_queue_fails() {
        let transport = InMemTransport::send_only(InMemNetwork::new());
        let err = transport
            .send("nowhere", msg(1), &TransactionContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownQueue(q) if q == "nowhere"));
    }

    #[tokio::test]
    async fn test_rolled_back_receive_returns_message() {
        let network = InMemNetwork::new();
        let transport = InMemTransport::new(network.clone(), "input");
        network.deliver("input", msg(1)).unwrap();

        let ctx = TransactionContext::new();
        let received = transport
            .receive(&ctx, &CancellationSignal::never())
            .await
            .unwrap();
        assert!(received.is_some());
        assert_eq!(network.count("input"), 0);

        ctx.dispose();
        assert_eq!(network.count("input"), 1);
    }

    #[tokio::test]
    async fn test_committed_receive_consumes_message() {
        let network = InMemNetwork::new();
        let transport = InMemTransport::new(network.clone(), "input");
        network.deliver("input", msg(1)).unwrap();

        let ctx = TransactionContext::new();
        transport
            .receive(&ctx, &CancellationSignal::never())
            .await
            .unwrap();
        ctx.complete().await.unwrap();
        ctx.dispose();

        assert_eq!(network.count("input"), 0);
    }

    #[tokio::test]
    async fn test_failed_requeue_does_not_panic() {
        let network = InMemNetwork::new();
        let transport = InMemTransport::new(network.clone(), "input");
        network.deliver("input", msg(1)).unwrap();

        let ctx = TransactionContext::new();
        transport
            .receive(&ctx, &CancellationSignal::never())
            .await
            .unwrap();
        assert_eq!(network.delete_queue("input"), 0);

        ctx.dispose();
        assert!(!network.has_queue("input"));
        assert_eq!(network.count("input"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_receive_leaves_queue_alone() {
        let network = InMemNetwork::new();
        let transport = InMemTransport::new(network.clone(), "input");
        network.deliver("input", msg(1)).unwrap();

        let source = crate::transport::CancellationSource::new();
        source.cancel();
        let err = transport
            .receive(&TransactionContext::new(), &source.signal())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(network.count("input"), 1);
    }

    #[tokio::test]
    async fn test_send_only_cannot_receive() {
        let transport = InMemTransport::send_only(InMemNetwork::new());
        let err = transport
            .receive(&TransactionContext::new(), &CancellationSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoInputQueue));
        assert!(transport.address().is_none());
    }
}
