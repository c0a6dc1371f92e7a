//! Second-level retries under transaction scopes

use super::*;
use ambientbus::{Failed, RetryOptions, TransactionScopeConfigurationExt};
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn test_second_level_retries_work_inside_transaction_scopes() {
    let network = InMemNetwork::new();
    let activator = Arc::new(HandlerActivator::new());
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let failed_calls = Arc::new(AtomicUsize::new(0));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let calls = handler_calls.clone();
    activator.handle(move |_: String| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { anyhow::bail!("oh no!") }
    });
    let calls = failed_calls.clone();
    activator.handle_failed(move |failed: Failed<String>| {
        calls.fetch_add(1, Ordering::SeqCst);
        let done_tx = done_tx.clone();
        async move {
            done_tx.send(failed.error_details)?;
            Ok(())
        }
    });

    let bus = start_bus(&network, "whatever", activator, |o| {
        o.retry_strategy(RetryOptions::new().second_level_retries(true))
            .handle_messages_inside_transaction_scope();
    })
    .await;
    bus.send_local(&"HEJ 🙂".to_string()).await.unwrap();

    let error_details = next_within(&mut done_rx, Duration::from_secs(5))
        .await
        .expect("second-level dispatch did not happen");

    // be sure nothing else happens
    tokio::time::sleep(Duration::from_millis(500)).await;
    bus.shutdown().await;

    assert_eq!(handler_calls.load(Ordering::SeqCst), 5);
    assert_eq!(failed_calls.load(Ordering::SeqCst), 1);
    assert!(error_details.contains("oh no!"));
    assert_eq!(network.count("error"), 0);
    assert_eq!(network.count("whatever"), 0);
}

#[tokio::test]
async fn test_failing_second_level_handler_moves_message_to_error_queue() {
    let network = InMemNetwork::new();
    let activator = Arc::new(HandlerActivator::new());
    activator
        .handle(|_: String| async { anyhow::bail!("first level") })
        .handle_failed(|_: Failed<String>| async { anyhow::bail!("second level") });

    let bus = start_bus(&network, "poison", activator, |o| {
        o.retry_strategy(
            RetryOptions::new()
                .max_delivery_attempts(2)
                .second_level_retries(true),
        )
        .handle_messages_inside_transaction_scope();
    })
    .await;
    bus.send_local(&"x".to_string()).await.unwrap();

    assert!(eventually(|| network.count("error") == 1, Duration::from_secs(5)).await);
    bus.shutdown().await;
}
