//! Scenario: currency drift between quote and tracked entity
//!
//! # Invariants under test
//!
//! 1. Quote "EUR" against entity "USD" warns once; repeats stay silent for
//!    the scope's lifetime.
//! 2. Quotes without a currency never take part in the comparison.
//! 3. Case differences are not drift.
//! 4. Drift never blocks persistence.

use qw_config::CycleSettings;
use qw_testkit::{FakeQuoteProvider, Harness, InMemoryStore, LogCapture};

const DRIFT: &str = "quote currency differs from tracked entity currency";

#[tokio::test]
async fn eur_quote_for_usd_entity_warns_once() {
    let store = InMemoryStore::new();
    store.add_entity(1, "SAP", Some("USD"), Some(100_000_000));
    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, Some("EUR"));
    let h = Harness::new(provider, store, CycleSettings::default());
    let logs = LogCapture::start();

    let first = h.runtime.run_cycle().await;
    assert_eq!(logs.count("WARN", DRIFT), 1);
    assert_eq!(first.changed, 1, "drift does not block the write");

    h.provider.set_price("SAP", 1.06, Some("EUR"));
    h.runtime.run_cycle().await;
    h.runtime.run_cycle().await;
    assert_eq!(logs.count("WARN", DRIFT), 1);
    assert!(h.runtime.state().drift_warned().await.contains("SAP"));
}

#[tokio::test]
async fn quote_without_currency_is_excluded() {
    let store = InMemoryStore::new();
    store.add_entity(1, "SAP", Some("USD"), Some(100_000_000));
    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, None);
    let h = Harness::new(provider, store, CycleSettings::default());
    let logs = LogCapture::start();

    h.runtime.run_cycle().await;
    assert_eq!(logs.count("WARN", DRIFT), 0);
    assert!(h.runtime.state().drift_warned().await.is_empty());
}

#[tokio::test]
async fn case_only_difference_is_not_drift() {
    let store = InMemoryStore::new();
    store.add_entity(1, "SAP", Some("eur"), Some(100_000_000));
    store.add_entity(2, "BMW", None, Some(100_000_000));
    let provider = FakeQuoteProvider::new()
        .with_price("SAP", 1.05, Some("EUR"))
        .with_price("BMW", 1.05, Some("EUR"));
    let h = Harness::new(provider, store, CycleSettings::default());
    let logs = LogCapture::start();

    h.runtime.run_cycle().await;
    assert_eq!(logs.count("WARN", DRIFT), 0, "entity without currency is skipped too");
}
