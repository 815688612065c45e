//! Scenario: a moved quote is persisted and revalues its owners
//!
//! # Invariants under test
//!
//! 1. The persisted price equals round(price × 1e8); the source tag and a
//!    second-precision UTC fetch timestamp are set with it.
//! 2. `changed` equals the rows the writer reported, and exactly one `values`
//!    event carries every revalued owner.
//! 3. `values` precedes every `positions` event.
//! 4. A second identical cycle changes nothing and emits nothing.
//! 5. `values` covers every impacted owner, whether or not its aggregate
//!    moved; unmoved owners are sent as live rows and are not written back.

use qw_config::CycleSettings;
use qw_portfolio::Transaction;
use qw_schemas::ChangeEvent;
use qw_testkit::{FakeQuoteProvider, Harness, InMemoryStore, FAKE_SOURCE};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn one_owner_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.add_entity(1, "SAP", Some("EUR"), Some(100_000_000));
    store.add_owner(10, "Core", Some(100.0), Some(100.0));
    store.add_holding(10, 1, 100.0);
    store.add_transaction(10, Transaction::buy(1, 100.0, 100.0));
    store
}

#[tokio::test]
async fn quote_1_05_persists_and_emits_values_for_owner() {
    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, Some("EUR"));
    let h = Harness::new(provider, one_owner_store(), CycleSettings::default());

    let meta = h.runtime.run_cycle().await;

    assert!(!meta.skipped_running);
    assert_eq!(meta.symbols_total, 1);
    assert_eq!(meta.batches, 1);
    assert_eq!(meta.quotes_returned, 1);
    assert_eq!(meta.changed, 1);
    assert_eq!(meta.errors, 0);

    assert_eq!(h.store.price(1), Some(105_000_000));
    assert_eq!(h.store.price_source(1).as_deref(), Some(FAKE_SOURCE));
    let fetched_at = h.store.fetched_at(1).expect("fetched_at written");
    assert_eq!(fetched_at.len(), 20);
    assert!(fetched_at.ends_with('Z'));
    assert_eq!(&fetched_at[10..11], "T");

    assert_eq!(h.sink.topics(), vec!["values", "positions"]);
    let events = h.sink.events();
    let ChangeEvent::Values { rows } = &events[0] else {
        panic!("first event must be values, got {:?}", events[0]);
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].owner_id, 10);
    assert_eq!(rows[0].name, "Core");
    assert!(approx(rows[0].current_value, 105.0));
    assert!(approx(rows[0].purchase_baseline, 100.0));
    assert_eq!(rows[0].position_count, 1);
    assert_eq!(rows[0].performance.source, "live");
    assert!(approx(rows[0].performance.gain_abs, 5.0));
    assert!(approx(rows[0].performance.coverage_ratio, 1.0));

    let (cv, baseline) = h.store.owner_aggregate(10).unwrap();
    assert!(approx(cv.unwrap(), 105.0));
    assert!(approx(baseline.unwrap(), 100.0));

    match &events[1] {
        ChangeEvent::Positions { owner_id, rows } => {
            assert_eq!(*owner_id, 10);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].price, Some(1.05));
        }
        other => panic!("expected positions, got {other:?}"),
    }
}

#[tokio::test]
async fn identical_second_cycle_is_a_no_op() {
    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, Some("EUR"));
    let h = Harness::new(provider, one_owner_store(), CycleSettings::default());

    assert_eq!(h.runtime.run_cycle().await.changed, 1);
    let events_after_first = h.sink.len();

    let second = h.runtime.run_cycle().await;
    assert_eq!(second.changed, 0);
    assert_eq!(second.quotes_returned, 1);
    assert_eq!(h.sink.len(), events_after_first, "no events when nothing changed");
}

#[tokio::test]
async fn values_precede_positions_for_every_owner() {
    let store = one_owner_store();
    store.add_owner(20, "Satellite", None, None);
    store.add_holding(20, 1, 5.0);
    store.add_transaction(20, Transaction::buy(1, 5.0, 4.0));

    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, None);
    let h = Harness::new(provider, store, CycleSettings::default());

    h.runtime.run_cycle().await;

    assert_eq!(h.sink.topics(), vec!["values", "positions", "positions"]);
    let events = h.sink.events();
    let ChangeEvent::Values { rows } = &events[0] else {
        panic!("values must come first");
    };
    let ids: Vec<i64> = rows.iter().map(|r| r.owner_id).collect();
    assert_eq!(ids, vec![10, 20]);
}

#[tokio::test]
async fn no_position_loader_means_values_only() {
    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, None);
    let h = Harness::without_positions(provider, one_owner_store(), CycleSettings::default());

    h.runtime.run_cycle().await;
    assert_eq!(h.sink.topics(), vec!["values"]);
}

#[tokio::test]
async fn configured_source_tag_overrides_provider_name() {
    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, None);
    let settings = CycleSettings {
        price_source: Some("td-live".to_string()),
        ..CycleSettings::default()
    };
    let h = Harness::new(provider, one_owner_store(), settings);

    h.runtime.run_cycle().await;
    assert_eq!(h.store.price_source(1).as_deref(), Some("td-live"));
}

#[tokio::test]
async fn unmoved_aggregate_is_still_dispatched_live() {
    let store = InMemoryStore::new();
    store.add_entity(2, "BMW", Some("EUR"), None);
    store.add_owner(30, "Closed", Some(0.0), Some(0.0));
    store.add_transaction(30, Transaction::buy(2, 10.0, 100.0));
    store.add_transaction(30, Transaction::sell(2, 10.0, 120.0));

    let provider = FakeQuoteProvider::new().with_price("BMW", 12.0, None);
    let h = Harness::new(provider, store, CycleSettings::default());

    let meta = h.runtime.run_cycle().await;
    assert_eq!(meta.changed, 1);

    assert_eq!(h.sink.topics(), vec!["values"], "owner without holdings has no positions");
    let events = h.sink.events();
    let ChangeEvent::Values { rows } = &events[0] else {
        panic!("expected values");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].owner_id, 30);
    assert_eq!(rows[0].performance.source, "live");
    assert_eq!(h.store.owner_aggregate(30), Some((Some(0.0), Some(0.0))));
}

#[tokio::test]
async fn impacted_owner_is_listed_even_when_another_owner_moved() {
    let store = one_owner_store();
    store.add_owner(20, "Closed", Some(0.0), Some(0.0));
    store.add_transaction(20, Transaction::buy(1, 10.0, 10.0));
    store.add_transaction(20, Transaction::sell(1, 10.0, 12.0));

    let provider = FakeQuoteProvider::new().with_price("SAP", 1.05, None);
    let h = Harness::new(provider, store, CycleSettings::default());

    let meta = h.runtime.run_cycle().await;
    assert_eq!(meta.changed, 1);

    let events = h.sink.events();
    let ChangeEvent::Values { rows } = &events[0] else {
        panic!("values must come first");
    };
    let ids: Vec<i64> = rows.iter().map(|r| r.owner_id).collect();
    assert_eq!(ids, vec![10, 20]);
    assert!(rows.iter().all(|r| r.performance.source == "live"));
    assert!(approx(rows[0].current_value, 105.0));
    assert_eq!(rows[1].current_value, 0.0);

    let (cv, _) = h.store.owner_aggregate(10).expect("owner 10");
    assert!(approx(cv.unwrap_or_default(), 105.0), "moved owner written back");
    assert_eq!(h.store.owner_aggregate(20), Some((Some(0.0), Some(0.0))));
}

#[tokio::test]
async fn entity_without_owners_changes_price_but_emits_nothing() {
    let store = InMemoryStore::new();
    store.add_entity(3, "ORPH", None, None);
    let provider = FakeQuoteProvider::new().with_price("ORPH", 3.0, None);
    let h = Harness::new(provider, store, CycleSettings::default());

    let meta = h.runtime.run_cycle().await;
    assert_eq!(meta.changed, 1);
    assert_eq!(h.store.price(3), Some(300_000_000));
    assert!(h.sink.is_empty());
}
