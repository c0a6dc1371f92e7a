//! Handling messages inside transaction scopes

use super::*;
use ambientbus::{
    execution, BusError, RetryOptions, StepAnchor, Transaction, TransactionScopeConfigurationExt,
    TransactionScopeOptions, TransactionStatus,
};
use parking_lot::Mutex;

async fn handler_sees_ambient_transaction(use_transaction_scope: bool) -> bool {
    let network = InMemNetwork::new();
    let activator = Arc::new(HandlerActivator::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    activator.handle(move |_: String| {
        let tx = tx.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(Transaction::current().is_some())?;
            Ok(())
        }
    });

    let bus = start_bus(&network, "txtest", activator, |o| {
        if use_transaction_scope {
            o.handle_messages_inside_transaction_scope();
        }
        o.log_pipeline(true);
    })
    .await;
    bus.send_local(&"hej".to_string()).await.unwrap();

    let detected = next_within(&mut rx, Duration::from_secs(2))
        .await
        .expect("handler was not called");
    bus.shutdown().await;
    detected
}

#[tokio::test]
async fn test_handler_sees_ambient_transaction_when_enabled() {
    assert!(handler_sees_ambient_transaction(true).await);
}

#[tokio::test]
async fn test_handler_sees_no_ambient_transaction_when_disabled() {
    assert!(!handler_sees_ambient_transaction(false).await);
}

#[tokio::test]
async fn test_successful_handling_commits_transaction() {
    let network = InMemNetwork::new();
    let activator = Arc::new(HandlerActivator::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    activator.handle(move |_: String| {
        let tx = tx.clone();
        async move {
            tx.send(Transaction::current())?;
            Ok(())
        }
    });

    let bus = start_bus(&network, "commit", activator, |o| {
        o.handle_messages_inside_transaction_scope();
    })
    .await;
    bus.send_local(&"hej".to_string()).await.unwrap();

    let transaction = next_within(&mut rx, Duration::from_secs(2))
        .await
        .flatten()
        .expect("handler saw no transaction");
    let status = tokio::time::timeout(Duration::from_secs(2), transaction.outcome())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(status, TransactionStatus::Committed);
    assert_eq!(network.count("commit"), 0);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_handler_failure_rolls_back_and_keeps_message() {
    let network = InMemNetwork::new();
    let activator = Arc::new(HandlerActivator::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    activator.handle(move |_: String| {
        let s = s.clone();
        async move {
            s.lock().extend(Transaction::current());
            anyhow::bail!("handler failed")
        }
    });

    let bus = start_bus(&network, "rollback", activator, |o| {
        o.retry_strategy(RetryOptions::new().max_delivery_attempts(1))
            .handle_messages_inside_transaction_scope();
    })
    .await;
    bus.send_local(&"hej".to_string()).await.unwrap();

    // the failed delivery is not acknowledged; the retry step moves it on
    // the next delivery
    assert!(eventually(|| network.count("error") == 1, Duration::from_secs(2)).await);
    bus.shutdown().await;

    let first = seen.lock().first().cloned().expect("handler saw no transaction");
    assert_eq!(first.outcome().await.unwrap(), TransactionStatus::Aborted);
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(network.count("rollback"), 0);
}

#[tokio::test]
async fn test_failed_commit_work_rolls_back_transaction() {
    let network = InMemNetwork::new();
    let activator = Arc::new(HandlerActivator::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let deliveries = Arc::new(Mutex::new(0u32));
    let d = deliveries.clone();
    activator.handle(move |_: String| {
        let tx = tx.clone();
        let delivery = {
            let mut d = d.lock();
            *d += 1;
            *d
        };
        async move {
            if delivery == 1 {
                let context = execution::current_context().expect("no transaction context");
                context.on_commit(|| async { anyhow::bail!("could not write outbox") })?;
            }
            tx.send(Transaction::current())?;
            Ok(())
        }
    });

    let bus = start_bus(&network, "commit-work", activator, |o| {
        o.handle_messages_inside_transaction_scope();
    })
    .await;
    bus.send_local(&"hej".to_string()).await.unwrap();

    let first = next_within(&mut rx, Duration::from_secs(2))
        .await
        .flatten()
        .expect("handler saw no transaction");
    let second = next_within(&mut rx, Duration::from_secs(2))
        .await
        .flatten()
        .expect("message was not delivered again");

    let outcome = |t: Transaction| async move {
        tokio::time::timeout(Duration::from_secs(2), t.outcome())
            .await
            .unwrap()
            .unwrap()
    };
    assert_eq!(outcome(first).await, TransactionStatus::Aborted);
    assert_eq!(outcome(second).await, TransactionStatus::Committed);
    assert_eq!(*deliveries.lock(), 2);
    assert!(eventually(|| network.count("commit-work") == 0, Duration::from_secs(2)).await);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_outgoing_messages_leave_with_the_handled_message() {
    let network = InMemNetwork::new();
    network.create_queue("out");
    let activator = Arc::new(HandlerActivator::new());
    let bus_slot: Arc<Mutex<Option<Bus>>> = Arc::new(Mutex::new(None));
    let b = bus_slot.clone();
    activator.handle(move |text: String| {
        let bus = b.lock().clone();
        async move {
            let bus = bus.expect("bus not started");
            bus.send("out", &format!("re: {text}")).await?;
            anyhow::ensure!(text != "fail", "handler failed after sending");
            Ok(())
        }
    });

    let bus = start_bus(&network, "relay", activator, |o| {
        o.retry_strategy(RetryOptions::new().max_delivery_attempts(1))
            .handle_messages_inside_transaction_scope();
    })
    .await;
    *bus_slot.lock() = Some(bus.clone());

    bus.send_local(&"fail".to_string()).await.unwrap();
    assert!(eventually(|| network.count("error") == 1, Duration::from_secs(2)).await);
    assert_eq!(network.count("out"), 0);

    bus.send_local(&"ok".to_string()).await.unwrap();
    assert!(eventually(|| network.count("out") == 1, Duration::from_secs(2)).await);

    bus_slot.lock().take();
    bus.shutdown().await;
}

#[tokio::test]
async fn test_custom_anchor_is_honoured() {
    let network = InMemNetwork::new();
    let activator = Arc::new(HandlerActivator::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    activator.handle(move |_: String| {
        let tx = tx.clone();
        async move {
            tx.send(Transaction::current().is_some())?;
            Ok(())
        }
    });

    let bus = start_bus(&network, "anchored", activator, |o| {
        o.handle_messages_inside_transaction_scope_with(
            TransactionScopeOptions::new()
                .timeout(Duration::from_secs(5))
                .anchor(StepAnchor::Before("dispatch".to_string())),
        );
    })
    .await;
    bus.send_local(&"hej".to_string()).await.unwrap();

    assert_eq!(next_within(&mut rx, Duration::from_secs(2)).await, Some(true));
    bus.shutdown().await;
}

#[tokio::test]
async fn test_unknown_anchor_fails_start() {
    let result = BusBuilder::new(Arc::new(HandlerActivator::new()))
        .transport(InMemTransport::new(InMemNetwork::new(), "nowhere"))
        .options(|o| {
            o.handle_messages_inside_transaction_scope_with(
                TransactionScopeOptions::new().anchor(StepAnchor::After("missing".to_string())),
            );
        })
        .start()
        .await;

    assert!(matches!(result, Err(BusError::Pipeline(_))));
}
