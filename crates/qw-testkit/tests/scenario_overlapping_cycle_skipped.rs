//! Scenario: overlapping cycles on one scope
//!
//! # Invariants under test
//!
//! 1. While a cycle holds the scope lock, another invocation returns at once
//!    with `skippedRunning = true`, `symbolsTotal = 0`, `changed = 0`.
//! 2. A skipped invocation touches neither storage nor the provider, and
//!    leaves the error counter and last meta alone.
//! 3. Once the running cycle finishes, the next invocation runs normally.

use std::sync::Arc;

use qw_config::CycleSettings;
use qw_testkit::{FakeQuoteProvider, FakeStep, Harness, InMemoryStore};

fn store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.add_entity(1, "SAP", None, Some(100_000_000));
    store
}

#[tokio::test]
async fn held_lock_yields_skipped_meta_without_io() {
    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, None);
    let h = Harness::new(provider, store(), CycleSettings::default());

    let guard = h.runtime.state().try_acquire().expect("lock free");
    let meta = h.runtime.run_cycle().await;
    drop(guard);

    assert!(meta.skipped_running);
    assert_eq!(meta.symbols_total, 0);
    assert_eq!(meta.changed, 0);
    assert_eq!(h.store.calls(), 0);
    assert_eq!(h.provider.call_count(), 0);
    assert!(h.runtime.state().last_meta().await.is_none());

    let meta = h.runtime.run_cycle().await;
    assert!(!meta.skipped_running);
    assert_eq!(meta.changed, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_invocation_during_slow_fetch_is_skipped() {
    let provider = FakeQuoteProvider::new();
    provider.push_step(FakeStep::Hang);
    let h = Harness::new(provider, store(), CycleSettings::default());
    let runtime = Arc::new(h.runtime);

    let slow = {
        let rt = Arc::clone(&runtime);
        tokio::spawn(async move { rt.run_cycle().await })
    };
    // let the first cycle reach the hanging fetch
    while h.provider.call_count() == 0 {
        tokio::task::yield_now().await;
    }

    let calls_before = h.store.calls();
    let skipped = runtime.run_cycle().await;
    assert!(skipped.skipped_running);
    assert_eq!(h.store.calls(), calls_before);
    assert_eq!(runtime.state().error_count(), 0);

    let first = slow.await.expect("cycle task");
    assert!(!first.skipped_running);
    assert_eq!(first.errors, 1, "timed out chunk");
    assert_eq!(runtime.state().error_count(), 1);
}
