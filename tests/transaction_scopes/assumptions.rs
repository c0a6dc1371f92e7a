//! Disposal assumptions the integration relies on

use ambientbus::{AsyncFlow, TransactionContext, TransactionScope, TransactionStatus};
use parking_lot::Mutex;
use std::sync::Arc;

#[tokio::test]
async fn test_scope_can_be_disposed_twice() {
    let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
    scope.dispose();
    scope.dispose();
    drop(scope);
}

#[tokio::test]
async fn test_completed_scope_disposed_twice_commits_once() {
    let scope = TransactionScope::with_async_flow(AsyncFlow::Enabled);
    let transaction = scope.transaction().unwrap();
    let completions = Arc::new(Mutex::new(0));
    let c = completions.clone();
    transaction.on_completed(move |_| *c.lock() += 1);

    scope.complete();
    scope.dispose();
    scope.dispose();

    assert_eq!(transaction.outcome().await.unwrap(), TransactionStatus::Committed);
    assert_eq!(*completions.lock(), 1);
}

#[test]
fn test_context_dispose_hooks_run_once() {
    let context = TransactionContext::new();
    let runs = Arc::new(Mutex::new(0));
    let r = runs.clone();
    context.on_dispose(move |_| *r.lock() += 1).unwrap();

    context.dispose();
    context.dispose();
    drop(context);

    assert_eq!(*runs.lock(), 1);
}
