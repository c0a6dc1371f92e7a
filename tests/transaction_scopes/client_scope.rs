//! Sending from application-owned transaction scopes

use super::*;
use ambientbus::{AsyncFlow, EnlistBus, EnlistError, TransactionScope, TransactionStatus};

const MESSAGE: &str = "hallå i stuen!1";
const FAILURE: &str = "omg what is this?????";

#[derive(Debug, Clone, Copy)]
struct Scenario {
    throw_exception: bool,
    enlist_in_scope: bool,
    complete_the_scope: bool,
    expect_to_receive_message: bool,
}

const SCENARIOS: [Scenario; 5] = [
    Scenario {
        throw_exception: false,
        enlist_in_scope: true,
        complete_the_scope: false,
        expect_to_receive_message: false,
    },
    Scenario {
        throw_exception: true,
        enlist_in_scope: true,
        complete_the_scope: false,
        expect_to_receive_message: false,
    },
    Scenario {
        throw_exception: false,
        enlist_in_scope: true,
        complete_the_scope: false,
        expect_to_receive_message: false,
    },
    Scenario {
        throw_exception: false,
        enlist_in_scope: true,
        complete_the_scope: true,
        expect_to_receive_message: true,
    },
    Scenario {
        throw_exception: true,
        enlist_in_scope: false,
        complete_the_scope: true,
        expect_to_receive_message: true,
    },
];

async fn send_inside(scope: &TransactionScope, bus: &Bus, scenario: Scenario) -> anyhow::Result<()> {
    if scenario.enlist_in_scope {
        scope.enlist_bus()?;
    }

    bus.send_local(&MESSAGE.to_string()).await?;

    if scenario.throw_exception {
        anyhow::bail!(FAILURE);
    }
    if scenario.complete_the_scope {
        scope.complete();
    }
    Ok(())
}

async fn sends_message_only_when_scope_is_completed(scenario: Scenario) {
    let network = InMemNetwork::new();
    let (activator, mut received) = recording_activator();
    let bus = start_bus(&network, "tx-text", activator, |_| {}).await;

    let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
    let result = scope.run(send_inside(&scope, &bus, scenario)).await;
    match result {
        Ok(()) => assert!(!scenario.throw_exception),
        Err(e) => assert_eq!(e.to_string(), FAILURE),
    }
    let _ = scope.finish().await;

    let got_message = next_within(&mut received, Duration::from_secs(1)).await.is_some();
    assert_eq!(
        got_message, scenario.expect_to_receive_message,
        "given {scenario:?} we expected that the message {}",
        if scenario.expect_to_receive_message {
            "WOULD be RECEIVED"
        } else {
            "would NOT BE RECEIVED"
        }
    );
    bus.shutdown().await;
}

#[tokio::test]
async fn test_enlisted_uncompleted_scope_sends_nothing() {
    sends_message_only_when_scope_is_completed(SCENARIOS[0]).await;
}

#[tokio::test]
async fn test_enlisted_scope_failing_sends_nothing() {
    sends_message_only_when_scope_is_completed(SCENARIOS[1]).await;
}

#[tokio::test]
async fn test_enlisted_scope_disposed_without_complete_sends_nothing() {
    sends_message_only_when_scope_is_completed(SCENARIOS[2]).await;
}

#[tokio::test]
async fn test_enlisted_completed_scope_sends_message() {
    sends_message_only_when_scope_is_completed(SCENARIOS[3]).await;
}

#[tokio::test]
async fn test_unenlisted_send_ignores_failed_scope() {
    sends_message_only_when_scope_is_completed(SCENARIOS[4]).await;
}

#[tokio::test]
async fn test_completed_scope_delivers_exactly_once() {
    let network = InMemNetwork::new();
    let (activator, mut received) = recording_activator();
    let bus = start_bus(&network, "once", activator, |_| {}).await;

    let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
    scope
        .run(async {
            scope.enlist_bus()?;
            bus.send_local(&MESSAGE.to_string()).await?;
            scope.complete();
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();
    assert_eq!(
        scope.finish().await.unwrap(),
        Some(TransactionStatus::Committed)
    );

    assert_eq!(
        next_within(&mut received, Duration::from_secs(1)).await.as_deref(),
        Some(MESSAGE)
    );
    assert!(next_within(&mut received, Duration::from_millis(300)).await.is_none());
    bus.shutdown().await;
}

#[tokio::test]
async fn test_second_enlist_is_rejected() {
    let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
    let second = scope
        .run(async {
            scope.enlist_bus().unwrap();
            scope.enlist_bus().err()
        })
        .await;

    assert!(matches!(second, Some(EnlistError::AlreadyEnlisted)));
    assert_eq!(scope.transaction().unwrap().participant_count(), 1);
}

#[tokio::test]
async fn test_enlist_without_ambient_transaction_is_rejected() {
    let scope = TransactionScope::with_async_flow(AsyncFlow::Suppressed);
    let err = scope.run(async { scope.enlist_bus().err() }).await;

    assert!(matches!(err, Some(EnlistError::NoAmbientTransaction)));
    assert_eq!(scope.transaction().unwrap().participant_count(), 0);
}

#[tokio::test]
async fn test_enlist_inside_handler_is_rejected() {
    let network = InMemNetwork::new();
    let activator = Arc::new(HandlerActivator::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    activator.handle(move |_: String| {
        let tx = tx.clone();
        async move {
            let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
            let rejected = scope
                .run(async { matches!(scope.enlist_bus(), Err(EnlistError::AlreadyEnlisted)) })
                .await;
            scope.complete();
            tx.send(rejected)?;
            Ok(())
        }
    });

    let bus = start_bus(&network, "nested", activator, |_| {}).await;
    bus.send_local(&MESSAGE.to_string()).await.unwrap();

    assert_eq!(next_within(&mut rx, Duration::from_secs(2)).await, Some(true));
    bus.shutdown().await;
}
