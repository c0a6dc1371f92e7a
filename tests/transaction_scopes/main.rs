//! Transaction Scope Integration Test Suite
//!
//! Runs real buses over the in-memory transport and checks how message
//! handling and sending interact with ambient transactions.
//!
//! ## Running Tests
//!
//! ```bash
//! # Run the whole suite
//! cargo test --test transaction_scopes
//!
//! # Client scope scenarios only
//! cargo test --test transaction_scopes client_scope::
//! ```

use std::sync::Arc;
use std::time::Duration;

use ambientbus::{Bus, BusBuilder, HandlerActivator, InMemNetwork, InMemTransport, OptionsConfigurer};
use tokio::sync::mpsc;

// Test modules
pub mod assumptions;
pub mod client_scope;
pub mod retries;
pub mod support;

// =============================================================================
// SHARED TEST UTILITIES
// =============================================================================

/// Install a test-friendly tracing subscriber once
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Start a bus receiving from `queue` on `network`
pub async fn start_bus<F>(
    network: &InMemNetwork,
    queue: &str,
    activator: Arc<HandlerActivator>,
    configure: F,
) -> Bus
where
    F: FnOnce(&mut OptionsConfigurer),
{
    init_tracing();
    BusBuilder::new(activator)
        .transport(InMemTransport::new(network.clone(), queue))
        .options(configure)
        .start()
        .await
        .expect("Failed to start bus")
}

/// Activator whose `String` handler reports every message it receives
pub fn recording_activator() -> (Arc<HandlerActivator>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let activator = Arc::new(HandlerActivator::new());
    activator.handle(move |text: String| {
        let tx = tx.clone();
        async move {
            tx.send(text)?;
            Ok(())
        }
    });
    (activator, rx)
}

/// Wait up to `timeout` for the next item
pub async fn next_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, timeout: Duration) -> Option<T> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn eventually<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
