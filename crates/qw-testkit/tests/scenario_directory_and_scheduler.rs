//! Scenario: symbol directory caching and the per-scope scheduler
//!
//! # Invariants under test
//!
//! 1. The directory is built once and reused; retired and symbol-less
//!    entities are never quoted.
//! 2. `invalidate_directory` forces a rebuild on the next cycle.
//! 3. An empty directory logs one INFO until a non-empty build resets it.
//! 4. `ensure_scope` is idempotent, keeps the first scope's state and logs
//!    one scheduling line per scope.
//! 5. The timer fires a cycle at start and every interval afterwards;
//!    `teardown_scope` stops it and `run_now` honors the scope lock.

use std::sync::Arc;
use std::time::Duration;

use qw_config::CycleSettings;
use qw_db::TrackedEntity;
use qw_runtime::{CycleScheduler, ScopeRuntime};
use qw_testkit::{FakeQuoteProvider, Harness, InMemoryStore, LogCapture, RecordingSink};

#[tokio::test]
async fn directory_is_cached_until_invalidated() {
    let store = InMemoryStore::new();
    store.add_entity(1, "SAP", None, None);
    store.add_tracked(TrackedEntity {
        id: 2,
        symbol: Some("OLD".to_string()),
        currency: None,
        retired: true,
    });
    store.add_tracked(TrackedEntity {
        id: 3,
        symbol: None,
        currency: None,
        retired: false,
    });
    let provider = FakeQuoteProvider::new().with_price("SAP", 1.0, None);
    let h = Harness::new(provider, store, CycleSettings::default());

    let meta = h.runtime.run_cycle().await;
    assert_eq!(meta.symbols_total, 1);
    assert_eq!(h.provider.calls()[0], vec!["SAP".to_string()]);

    h.store.add_entity(4, "BMW", None, None);
    let meta = h.runtime.run_cycle().await;
    assert_eq!(meta.symbols_total, 1, "cached directory is reused");

    h.runtime.state().invalidate_directory().await;
    let meta = h.runtime.run_cycle().await;
    assert_eq!(meta.symbols_total, 2);
    assert_eq!(h.runtime.state().last_symbol_count(), 2);
}

#[tokio::test]
async fn empty_directory_logs_once() {
    let h = Harness::new(FakeQuoteProvider::new(), InMemoryStore::new(), CycleSettings::default());
    let logs = LogCapture::start();

    for _ in 0..3 {
        let meta = h.runtime.run_cycle().await;
        assert_eq!(meta.symbols_total, 0);
        assert_eq!(meta.batches, 0);
    }
    assert_eq!(logs.count("INFO", "no tracked symbols"), 1);
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(h.runtime.state().error_count(), 0, "nothing to price is not a failure");

    h.store.add_entity(1, "SAP", None, None);
    h.runtime.run_cycle().await;
    h.runtime.state().invalidate_directory().await;
    h.store.add_tracked(TrackedEntity {
        id: 1,
        symbol: Some("SAP".to_string()),
        currency: None,
        retired: true,
    });
    h.runtime.run_cycle().await;
    assert_eq!(logs.count("INFO", "no tracked symbols"), 2);
}

fn runtime(scope: &str, store: Arc<InMemoryStore>, provider: Arc<FakeQuoteProvider>) -> ScopeRuntime {
    let settings = CycleSettings {
        interval_secs: 60,
        ..CycleSettings::default()
    };
    ScopeRuntime::new(scope, settings, provider, store, Arc::new(RecordingSink::new()))
}

#[tokio::test(start_paused = true)]
async fn scheduler_ticks_and_tears_down() {
    let store = Arc::new(InMemoryStore::new());
    store.add_entity(1, "SAP", None, None);
    let provider = Arc::new(FakeQuoteProvider::new().with_price("SAP", 1.0, None));
    let scheduler = CycleScheduler::new();
    let logs = LogCapture::start();

    let rt = scheduler
        .ensure_scope(runtime("main", store.clone(), provider.clone()))
        .await;
    let again = scheduler
        .ensure_scope(runtime("main", store.clone(), provider.clone()))
        .await;
    assert!(Arc::ptr_eq(&rt, &again), "second ensure returns the running scope");
    assert_eq!(scheduler.scopes().await, vec!["main".to_string()]);
    assert_eq!(logs.count("INFO", "price cycle scheduled"), 1);

    // first tick fires immediately
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(provider.call_count(), 1);
    let meta = scheduler.last_meta("main").await.expect("cycle ran");
    assert_eq!(meta.changed, 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(provider.call_count(), 2);

    let manual = scheduler.run_now("main").await.expect("scope exists");
    assert!(!manual.skipped_running);
    assert_eq!(provider.call_count(), 3);

    assert!(scheduler.teardown_scope("main").await);
    assert!(!scheduler.teardown_scope("main").await);
    assert!(scheduler.run_now("main").await.is_none());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(provider.call_count(), 3, "no ticks after teardown");
}

#[tokio::test(start_paused = true)]
async fn run_now_honors_the_scope_lock() {
    let store = Arc::new(InMemoryStore::new());
    store.add_entity(1, "SAP", None, None);
    let provider = Arc::new(FakeQuoteProvider::new().with_price("SAP", 1.0, None));
    let scheduler = CycleScheduler::new();
    let rt = scheduler
        .ensure_scope(runtime("main", store.clone(), provider.clone()))
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let guard = rt.state().try_acquire().expect("idle between ticks");
    let meta = scheduler.run_now("main").await.expect("scope exists");
    drop(guard);
    assert!(meta.skipped_running);

    scheduler.shutdown().await;
    assert!(scheduler.scopes().await.is_empty());
}
